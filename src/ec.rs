//! Elliptic curve arithmetic over prime fields.
//!
//! Short Weierstrass curves `y² = x³ + ax + b (mod p)` with the point
//! encoding of BSI TR-03111 and plain ECDSA signatures. The arithmetic is
//! not constant time. ECDSA on P-256 and P-384 goes through the `p256` and
//! `p384` crates instead.

use alloc::{format, string::String, vec, vec::Vec};
use ecdsa::signature::hazmat::{PrehashVerifier, RandomizedPrehashSigner};
use num_bigint_dig::BigUint;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use tracing::{error, trace};

use crate::{
    bytes2hex,
    numeric::{byte_len, i2os, mod_add, mod_inv_prime, mod_mul, mod_sub, os2i, random_scalar},
    EmrtdError,
};

/// A point on a curve in affine coordinates, or the point at infinity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcPoint {
    Infinity,
    Affine { x: BigUint, y: BigUint },
}

impl EcPoint {
    #[must_use]
    pub fn new(x: BigUint, y: BigUint) -> Self {
        Self::Affine { x, y }
    }

    #[must_use]
    pub fn is_infinity(&self) -> bool {
        matches!(self, Self::Infinity)
    }

    #[must_use]
    pub fn x(&self) -> Option<&BigUint> {
        match self {
            Self::Infinity => None,
            Self::Affine { x, .. } => Some(x),
        }
    }

    #[must_use]
    pub fn y(&self) -> Option<&BigUint> {
        match self {
            Self::Infinity => None,
            Self::Affine { y, .. } => Some(y),
        }
    }
}

/// Jacobian coordinates `(X, Y, Z)` for `x = X/Z²`, `y = Y/Z³`; `Z = 0` is infinity.
#[derive(Clone)]
struct Jacobian {
    x: BigUint,
    y: BigUint,
    z: BigUint,
}

/// Elliptic curve domain parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcCurve {
    /// Field prime.
    pub p: BigUint,
    pub a: BigUint,
    pub b: BigUint,
    /// Base point.
    pub g: EcPoint,
    /// Order of the base point.
    pub n: BigUint,
    /// Cofactor.
    pub h: BigUint,
}

impl EcCurve {
    /// Creates curve parameters and checks that the base point lies on the curve.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` if the parameters are inconsistent.
    pub fn new(
        p: BigUint,
        a: BigUint,
        b: BigUint,
        g: EcPoint,
        n: BigUint,
        h: BigUint,
    ) -> Result<Self, EmrtdError> {
        if p <= BigUint::from(3_u32) || a >= p || b >= p || n.is_zero() || h.is_zero() {
            error!("Invalid elliptic curve parameters");
            return Err(EmrtdError::InvalidArgument("Invalid elliptic curve parameters"));
        }
        let curve = Self { p, a, b, g, n, h };
        if curve.g.is_infinity() || !curve.is_on_curve(&curve.g) {
            error!("Base point is not on the curve");
            return Err(EmrtdError::InvalidArgument("Base point is not on the curve"));
        }
        Ok(curve)
    }

    /// Length in bytes of a field element.
    #[must_use]
    pub fn field_size(&self) -> usize {
        byte_len(&self.p)
    }

    /// Length in bytes of a scalar modulo the order.
    #[must_use]
    pub fn order_size(&self) -> usize {
        byte_len(&self.n)
    }

    /// Whether `point` satisfies the curve equation. Infinity is on every curve.
    #[must_use]
    pub fn is_on_curve(&self, point: &EcPoint) -> bool {
        match point {
            EcPoint::Infinity => true,
            EcPoint::Affine { x, y } => {
                if *x >= self.p || *y >= self.p {
                    return false;
                }
                let lhs = mod_mul(y, y, &self.p);
                let x3 = mod_mul(&mod_mul(x, x, &self.p), x, &self.p);
                let rhs = mod_add(
                    &mod_add(&x3, &mod_mul(&self.a, x, &self.p), &self.p),
                    &self.b,
                    &self.p,
                );
                lhs == rhs
            }
        }
    }

    #[must_use]
    pub fn negate(&self, point: &EcPoint) -> EcPoint {
        match point {
            EcPoint::Infinity => EcPoint::Infinity,
            EcPoint::Affine { x, y } => {
                EcPoint::new(x.clone(), mod_sub(&BigUint::zero(), y, &self.p))
            }
        }
    }

    /// Adds two points.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if a point is not on the curve.
    pub fn add(&self, lhs: &EcPoint, rhs: &EcPoint) -> Result<EcPoint, EmrtdError> {
        self.check_on_curve(lhs)?;
        self.check_on_curve(rhs)?;
        let sum = self.jacobian_add(&self.to_jacobian(lhs), &self.to_jacobian(rhs));
        self.to_affine(&sum)
    }

    /// Doubles a point.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if the point is not on the curve.
    pub fn double(&self, point: &EcPoint) -> Result<EcPoint, EmrtdError> {
        self.check_on_curve(point)?;
        let doubled = self.jacobian_double(&self.to_jacobian(point));
        self.to_affine(&doubled)
    }

    /// Computes `k·point` with double-and-add.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if the point is not on the curve.
    pub fn multiply(&self, point: &EcPoint, k: &BigUint) -> Result<EcPoint, EmrtdError> {
        self.check_on_curve(point)?;
        let base = self.to_jacobian(point);
        let mut acc = Self::jacobian_infinity();
        for byte in k.to_bytes_be() {
            for shift in (0..8).rev() {
                acc = self.jacobian_double(&acc);
                if (byte >> shift) & 1 == 1 {
                    acc = self.jacobian_add(&acc, &base);
                }
            }
        }
        self.to_affine(&acc)
    }

    /// Computes `k·G`.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if the arithmetic fails.
    pub fn multiply_generator(&self, k: &BigUint) -> Result<EcPoint, EmrtdError> {
        self.multiply(&self.g, k)
    }

    /// Checks that a received public point is usable: on the curve, not
    /// infinity and, for curves with a cofactor, in the subgroup of `G`.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::MalformedInput` if the point is invalid.
    pub fn validate_public_point(&self, point: &EcPoint) -> Result<(), EmrtdError> {
        if point.is_infinity() || !self.is_on_curve(point) {
            error!("Public point is not a valid point on the curve");
            return Err(EmrtdError::MalformedInput(String::from(
                "public point is not on the curve",
            )));
        }
        if !self.h.is_one() && !self.multiply(point, &self.n)?.is_infinity() {
            error!("Public point is not in the subgroup generated by G");
            return Err(EmrtdError::MalformedInput(String::from(
                "public point is not in the prime order subgroup",
            )));
        }
        Ok(())
    }

    /// Uncompressed encoding `04 ‖ X ‖ Y` with fixed width coordinates.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` for the point at infinity.
    pub fn encode_point(&self, point: &EcPoint) -> Result<Vec<u8>, EmrtdError> {
        match point {
            EcPoint::Infinity => {
                error!("The point at infinity has no uncompressed encoding");
                Err(EmrtdError::InvalidArgument("Can not encode the point at infinity"))
            }
            EcPoint::Affine { x, y } => {
                let len = self.field_size();
                Ok([&[0x04][..], &i2os(x, len)?, &i2os(y, len)?].concat())
            }
        }
    }

    /// Decodes an uncompressed point and checks that it lies on the curve.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::MalformedInput` if the encoding or the point is invalid.
    pub fn decode_point(&self, data: &[u8]) -> Result<EcPoint, EmrtdError> {
        let len = self.field_size();
        if data.len() != 1 + 2 * len || data[0] != 0x04 {
            error!("Invalid uncompressed point encoding: {}", bytes2hex(data));
            return Err(EmrtdError::MalformedInput(format!(
                "expected uncompressed point of {} bytes, found {} bytes",
                1 + 2 * len,
                data.len()
            )));
        }
        let point = EcPoint::new(os2i(&data[1..=len]), os2i(&data[1 + len..]));
        if !self.is_on_curve(&point) {
            error!("Decoded point is not on the curve: {}", bytes2hex(data));
            return Err(EmrtdError::MalformedInput(String::from(
                "decoded point is not on the curve",
            )));
        }
        Ok(point)
    }

    /// Best effort name of well known parameters, for diagnostics.
    #[must_use]
    pub fn name(&self) -> Option<&'static str> {
        NamedCurve::infer(self).map(|named| named.name())
    }

    fn check_on_curve(&self, point: &EcPoint) -> Result<(), EmrtdError> {
        if self.is_on_curve(point) {
            Ok(())
        } else {
            error!("Point is not on the curve");
            Err(EmrtdError::InvalidArgument("Point is not on the curve"))
        }
    }

    fn jacobian_infinity() -> Jacobian {
        Jacobian {
            x: BigUint::one(),
            y: BigUint::one(),
            z: BigUint::zero(),
        }
    }

    fn to_jacobian(&self, point: &EcPoint) -> Jacobian {
        match point {
            EcPoint::Infinity => Self::jacobian_infinity(),
            EcPoint::Affine { x, y } => Jacobian {
                x: x.clone(),
                y: y.clone(),
                z: BigUint::one(),
            },
        }
    }

    fn to_affine(&self, point: &Jacobian) -> Result<EcPoint, EmrtdError> {
        if point.z.is_zero() {
            return Ok(EcPoint::Infinity);
        }
        let p = &self.p;
        let z_inv = mod_inv_prime(&point.z, p)?;
        let z_inv2 = mod_mul(&z_inv, &z_inv, p);
        let z_inv3 = mod_mul(&z_inv2, &z_inv, p);
        Ok(EcPoint::new(
            mod_mul(&point.x, &z_inv2, p),
            mod_mul(&point.y, &z_inv3, p),
        ))
    }

    fn jacobian_double(&self, q: &Jacobian) -> Jacobian {
        let p = &self.p;
        if q.z.is_zero() || q.y.is_zero() {
            return Self::jacobian_infinity();
        }
        let y2 = mod_mul(&q.y, &q.y, p);
        let s = mod_mul(&BigUint::from(4_u32), &mod_mul(&q.x, &y2, p), p);
        let z2 = mod_mul(&q.z, &q.z, p);
        let z4 = mod_mul(&z2, &z2, p);
        let m = mod_add(
            &mod_mul(&BigUint::from(3_u32), &mod_mul(&q.x, &q.x, p), p),
            &mod_mul(&self.a, &z4, p),
            p,
        );
        let x3 = mod_sub(&mod_mul(&m, &m, p), &mod_add(&s, &s, p), p);
        let y4 = mod_mul(&y2, &y2, p);
        let y3 = mod_sub(
            &mod_mul(&m, &mod_sub(&s, &x3, p), p),
            &mod_mul(&BigUint::from(8_u32), &y4, p),
            p,
        );
        let z3 = mod_mul(&mod_add(&q.y, &q.y, p), &q.z, p);
        Jacobian {
            x: x3,
            y: y3,
            z: z3,
        }
    }

    fn jacobian_add(&self, q1: &Jacobian, q2: &Jacobian) -> Jacobian {
        let p = &self.p;
        if q1.z.is_zero() {
            return q2.clone();
        }
        if q2.z.is_zero() {
            return q1.clone();
        }
        let z1z1 = mod_mul(&q1.z, &q1.z, p);
        let z2z2 = mod_mul(&q2.z, &q2.z, p);
        let u1 = mod_mul(&q1.x, &z2z2, p);
        let u2 = mod_mul(&q2.x, &z1z1, p);
        let s1 = mod_mul(&q1.y, &mod_mul(&q2.z, &z2z2, p), p);
        let s2 = mod_mul(&q2.y, &mod_mul(&q1.z, &z1z1, p), p);
        if u1 == u2 {
            if s1 == s2 {
                return self.jacobian_double(q1);
            }
            return Self::jacobian_infinity();
        }
        let h = mod_sub(&u2, &u1, p);
        let r = mod_sub(&s2, &s1, p);
        let h2 = mod_mul(&h, &h, p);
        let h3 = mod_mul(&h2, &h, p);
        let u1h2 = mod_mul(&u1, &h2, p);
        let x3 = mod_sub(
            &mod_sub(&mod_mul(&r, &r, p), &h3, p),
            &mod_add(&u1h2, &u1h2, p),
            p,
        );
        let y3 = mod_sub(
            &mod_mul(&r, &mod_sub(&u1h2, &x3, p), p),
            &mod_mul(&s1, &h3, p),
            p,
        );
        let z3 = mod_mul(&h, &mod_mul(&q1.z, &q2.z, p), p);
        Jacobian {
            x: x3,
            y: y3,
            z: z3,
        }
    }
}

/// Curves with standardized domain parameter identifiers (BSI TR-03110-3 Table 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedCurve {
    Secp192r1,
    BrainpoolP192r1,
    Secp224r1,
    BrainpoolP224r1,
    Secp256r1,
    BrainpoolP256r1,
    BrainpoolP320r1,
    Secp384r1,
    BrainpoolP384r1,
    BrainpoolP512r1,
    Secp521r1,
}

struct CurveConstants {
    p: &'static str,
    a: &'static str,
    b: &'static str,
    gx: &'static str,
    gy: &'static str,
    n: &'static str,
}

impl NamedCurve {
    pub const ALL: [Self; 11] = [
        Self::Secp192r1,
        Self::BrainpoolP192r1,
        Self::Secp224r1,
        Self::BrainpoolP224r1,
        Self::Secp256r1,
        Self::BrainpoolP256r1,
        Self::BrainpoolP320r1,
        Self::Secp384r1,
        Self::BrainpoolP384r1,
        Self::BrainpoolP512r1,
        Self::Secp521r1,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Secp192r1 => "secp192r1",
            Self::BrainpoolP192r1 => "brainpoolP192r1",
            Self::Secp224r1 => "secp224r1",
            Self::BrainpoolP224r1 => "brainpoolP224r1",
            Self::Secp256r1 => "secp256r1",
            Self::BrainpoolP256r1 => "brainpoolP256r1",
            Self::BrainpoolP320r1 => "brainpoolP320r1",
            Self::Secp384r1 => "secp384r1",
            Self::BrainpoolP384r1 => "brainpoolP384r1",
            Self::BrainpoolP512r1 => "brainpoolP512r1",
            Self::Secp521r1 => "secp521r1",
        }
    }

    #[rustfmt::skip]
    fn constants(&self) -> CurveConstants {
        match self {
            Self::Secp192r1 => CurveConstants {
                p: "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFFFFFFFFFFFFF",
                a: "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFFFFFFFFFFFFC",
                b: "64210519E59C80E70FA7E9AB72243049FEB8DEECC146B9B1",
                gx: "188DA80EB03090F67CBF20EB43A18800F4FF0AFD82FF1012",
                gy: "07192B95FFC8DA78631011ED6B24CDD573F977A11E794811",
                n: "FFFFFFFFFFFFFFFFFFFFFFFF99DEF836146BC9B1B4D22831",
            },
            Self::BrainpoolP192r1 => CurveConstants {
                p: "C302F41D932A36CDA7A3463093D18DB78FCE476DE1A86297",
                a: "6A91174076B1E0E19C39C031FE8685C1CAE040E5C69A28EF",
                b: "469A28EF7C28CCA3DC721D044F4496BCCA7EF4146FBF25C9",
                gx: "C0A0647EAAB6A48753B033C56CB0F0900A2F5C4853375FD6",
                gy: "14B690866ABD5BB88B5F4828C1490002E6773FA2FA299B8F",
                n: "C302F41D932A36CDA7A3462F9E9E916B5BE8F1029AC4ACC1",
            },
            Self::Secp224r1 => CurveConstants {
                p: "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF000000000000000000000001",
                a: "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFFFFFFFFFFFFFFFFFFFFE",
                b: "B4050A850C04B3ABF54132565044B0B7D7BFD8BA270B39432355FFB4",
                gx: "B70E0CBD6BB4BF7F321390B94A03C1D356C21122343280D6115C1D21",
                gy: "BD376388B5F723FB4C22DFE6CD4375A05A07476444D5819985007E34",
                n: "FFFFFFFFFFFFFFFFFFFFFFFFFFFF16A2E0B8F03E13DD29455C5C2A3D",
            },
            Self::BrainpoolP224r1 => CurveConstants {
                p: "D7C134AA264366862A18302575D1D787B09F075797DA89F57EC8C0FF",
                a: "68A5E62CA9CE6C1C299803A6C1530B514E182AD8B0042A59CAD29F43",
                b: "2580F63CCFE44138870713B1A92369E33E2135D266DBB372386C400B",
                gx: "0D9029AD2C7E5CF4340823B2A87DC68C9E4CE3174C1E6EFDEE12C07D",
                gy: "58AA56F772C0726F24C6B89E4ECDAC24354B9E99CAA3F6D3761402CD",
                n: "D7C134AA264366862A18302575D0FB98D116BC4B6DDEBCA3A5A7939F",
            },
            Self::Secp256r1 => CurveConstants {
                p: "FFFFFFFF00000001000000000000000000000000FFFFFFFFFFFFFFFFFFFFFFFF",
                a: "FFFFFFFF00000001000000000000000000000000FFFFFFFFFFFFFFFFFFFFFFFC",
                b: "5AC635D8AA3A93E7B3EBBD55769886BC651D06B0CC53B0F63BCE3C3E27D2604B",
                gx: "6B17D1F2E12C4247F8BCE6E563A440F277037D812DEB33A0F4A13945D898C296",
                gy: "4FE342E2FE1A7F9B8EE7EB4A7C0F9E162BCE33576B315ECECBB6406837BF51F5",
                n: "FFFFFFFF00000000FFFFFFFFFFFFFFFFBCE6FAADA7179E84F3B9CAC2FC632551",
            },
            Self::BrainpoolP256r1 => CurveConstants {
                p: "A9FB57DBA1EEA9BC3E660A909D838D726E3BF623D52620282013481D1F6E5377",
                a: "7D5A0975FC2C3057EEF67530417AFFE7FB8055C126DC5C6CE94A4B44F330B5D9",
                b: "26DC5C6CE94A4B44F330B5D9BBD77CBF958416295CF7E1CE6BCCDC18FF8C07B6",
                gx: "8BD2AEB9CB7E57CB2C4B482FFC81B7AFB9DE27E1E3BD23C23A4453BD9ACE3262",
                gy: "547EF835C3DAC4FD97F8461A14611DC9C27745132DED8E545C1D54C72F046997",
                n: "A9FB57DBA1EEA9BC3E660A909D838D718C397AA3B561A6F7901E0E82974856A7",
            },
            Self::BrainpoolP320r1 => CurveConstants {
                p: "D35E472036BC4FB7E13C785ED201E065F98FCFA6F6F40DEF4F92B9EC7893EC28FCD412B1F1B32E27",
                a: "3EE30B568FBAB0F883CCEBD46D3F3BB8A2A73513F5EB79DA66190EB085FFA9F492F375A97D860EB4",
                b: "520883949DFDBC42D3AD198640688A6FE13F41349554B49ACC31DCCD884539816F5EB4AC8FB1F1A6",
                gx: "43BD7E9AFB53D8B85289BCC48EE5BFE6F20137D10A087EB6E7871E2A10A599C710AF8D0D39E20611",
                gy: "14FDD05545EC1CC8AB4093247F77275E0743FFED117182EAA9C77877AAAC6AC7D35245D1692E8EE1",
                n: "D35E472036BC4FB7E13C785ED201E065F98FCFA5B68F12A32D482EC7EE8658E98691555B44C59311",
            },
            Self::Secp384r1 => CurveConstants {
                p: "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFFFFF0000000000000000FFFFFFFF",
                a: "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFFFFF0000000000000000FFFFFFFC",
                b: "B3312FA7E23EE7E4988E056BE3F82D19181D9C6EFE8141120314088F5013875AC656398D8A2ED19D2A85C8EDD3EC2AEF",
                gx: "AA87CA22BE8B05378EB1C71EF320AD746E1D3B628BA79B9859F741E082542A385502F25DBF55296C3A545E3872760AB7",
                gy: "3617DE4A96262C6F5D9E98BF9292DC29F8F41DBD289A147CE9DA3113B5F0B8C00A60B1CE1D7E819D7A431D7C90EA0E5F",
                n: "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFC7634D81F4372DDF581A0DB248B0A77AECEC196ACCC52973",
            },
            Self::BrainpoolP384r1 => CurveConstants {
                p: "8CB91E82A3386D280F5D6F7E50E641DF152F7109ED5456B412B1DA197FB71123ACD3A729901D1A71874700133107EC53",
                a: "7BC382C63D8C150C3C72080ACE05AFA0C2BEA28E4FB22787139165EFBA91F90F8AA5814A503AD4EB04A8C7DD22CE2826",
                b: "04A8C7DD22CE28268B39B55416F0447C2FB77DE107DCD2A62E880EA53EEB62D57CB4390295DBC9943AB78696FA504C11",
                gx: "1D1C64F068CF45FFA2A63A81B7C13F6B8847A3E77EF14FE3DB7FCAFE0CBD10E8E826E03436D646AAEF87B2E247D4AF1E",
                gy: "8ABE1D7520F9C2A45CB1EB8E95CFD55262B70B29FEEC5864E19C054FF99129280E4646217791811142820341263C5315",
                n: "8CB91E82A3386D280F5D6F7E50E641DF152F7109ED5456B31F166E6CAC0425A7CF3AB6AF6B7FC3103B883202E9046565",
            },
            Self::BrainpoolP512r1 => CurveConstants {
                p: "AADD9DB8DBE9C48B3FD4E6AE33C9FC07CB308DB3B3C9D20ED6639CCA703308717D4D9B009BC66842AECDA12AE6A380E62881FF2F2D82C68528AA6056583A48F3",
                a: "7830A3318B603B89E2327145AC234CC594CBDD8D3DF91610A83441CAEA9863BC2DED5D5AA8253AA10A2EF1C98B9AC8B57F1117A72BF2C7B9E7C1AC4D77FC94CA",
                b: "3DF91610A83441CAEA9863BC2DED5D5AA8253AA10A2EF1C98B9AC8B57F1117A72BF2C7B9E7C1AC4D77FC94CADC083E67984050B75EBAE5DD2809BD638016F723",
                gx: "81AEE4BDD82ED9645A21322E9C4C6A9385ED9F70B5D916C1B43B62EEF4D0098EFF3B1F78E2D0D48D50D1687B93B97D5F7C6D5047406A5E688B352209BCB9F822",
                gy: "7DDE385D566332ECC0EABFA9CF7822FDF209F70024A57B1AA000C55B881F8111B2DCDE494A5F485E5BCA4BD88A2763AED1CA2B2FA8F0540678CD1E0F3AD80892",
                n: "AADD9DB8DBE9C48B3FD4E6AE33C9FC07CB308DB3B3C9D20ED6639CCA70330870553E5C414CA92619418661197FAC10471DB1D381085DDADDB58796829CA90069",
            },
            Self::Secp521r1 => CurveConstants {
                p: "01FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF",
                a: "01FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFC",
                b: "0051953EB9618E1C9A1F929A21A0B68540EEA2DA725B99B315F3B8B489918EF109E156193951EC7E937B1652C0BD3BB1BF073573DF883D2C34F1EF451FD46B503F00",
                gx: "00C6858E06B70404E9CD9E3ECB662395B4429C648139053FB521F828AF606B4D3DBAA14B5E77EFE75928FE1DC127A2FFA8DE3348B3C1856A429BF97E7E31C2E5BD66",
                gy: "011839296A789A3BC0045C8A5FB42C7D1BD998F54449579B446817AFBD17273E662C97EE72995EF42640C550B9013FAD0761353C7086A272C24088BE94769FD16650",
                n: "01FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFA51868783BF2F966B7FCC0148F709A5D03BB5C9B8899C47AEBB6FB71E91386409",
            },
        }
    }

    /// The curve parameters. All standardized curves have cofactor 1.
    #[must_use]
    pub fn curve(&self) -> EcCurve {
        let c = self.constants();
        EcCurve {
            p: hex_constant(c.p),
            a: hex_constant(c.a),
            b: hex_constant(c.b),
            g: EcPoint::new(hex_constant(c.gx), hex_constant(c.gy)),
            n: hex_constant(c.n),
            h: BigUint::one(),
        }
    }

    /// Matches explicit parameters against the known curves.
    #[must_use]
    pub fn infer(curve: &EcCurve) -> Option<Self> {
        Self::ALL.into_iter().find(|named| {
            let known = named.curve();
            known.p == curve.p && known.a == curve.a && known.b == curve.b && known.g == curve.g
        })
    }
}

pub(crate) fn hex_constant(hex: &str) -> BigUint {
    BigUint::parse_bytes(hex.as_bytes(), 16).expect("constant is valid hexadecimal")
}

/// Leftmost `bits(n)` bits of a digest, as in ECDSA.
fn digest_to_scalar(curve: &EcCurve, digest: &[u8]) -> BigUint {
    let e = os2i(digest);
    let digest_bits = digest.len() * 8;
    let order_bits = curve.n.bits();
    if digest_bits > order_bits {
        e >> (digest_bits - order_bits)
    } else {
        e
    }
}

/// Signs a message digest with ECDSA and returns the plain signature
/// `r ‖ s` (BSI TR-03111 Section 5.2.1).
///
/// # Errors
///
/// * `EmrtdError` if the private key is out of range.
pub fn ecdsa_sign<R: RngCore + CryptoRng>(
    curve: &EcCurve,
    private_key: &BigUint,
    digest: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>, EmrtdError> {
    if private_key.is_zero() || *private_key >= curve.n {
        error!("ECDSA private key is out of range");
        return Err(EmrtdError::InvalidArgument("ECDSA private key is out of range"));
    }
    let len = curve.order_size();
    match NamedCurve::infer(curve) {
        Some(NamedCurve::Secp256r1) => {
            let key = p256::ecdsa::SigningKey::from_slice(&i2os(private_key, len)?)
                .map_err(ecdsa_error)?;
            let signature: p256::ecdsa::Signature = key
                .sign_prehash_with_rng(rng, &prehash(digest, len))
                .map_err(ecdsa_error)?;
            Ok(signature.to_bytes().to_vec())
        }
        Some(NamedCurve::Secp384r1) => {
            let key = p384::ecdsa::SigningKey::from_slice(&i2os(private_key, len)?)
                .map_err(ecdsa_error)?;
            let signature: p384::ecdsa::Signature = key
                .sign_prehash_with_rng(rng, &prehash(digest, len))
                .map_err(ecdsa_error)?;
            Ok(signature.to_bytes().to_vec())
        }
        _ => generic_ecdsa_sign(curve, private_key, digest, rng),
    }
}

fn ecdsa_error(err: ecdsa::Error) -> EmrtdError {
    error!("ECDSA failed: {err}");
    EmrtdError::MalformedInput(format!("ECDSA failed: {err}"))
}

/// Left-pads a digest shorter than the order, which keeps its value.
fn prehash(digest: &[u8], len: usize) -> Vec<u8> {
    if digest.len() >= len {
        return digest.to_vec();
    }
    let mut padded = vec![0; len - digest.len()];
    padded.extend_from_slice(digest);
    padded
}

fn generic_ecdsa_sign<R: RngCore + CryptoRng>(
    curve: &EcCurve,
    private_key: &BigUint,
    digest: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>, EmrtdError> {
    let e = digest_to_scalar(curve, digest);
    let n = &curve.n;
    loop {
        let k = random_scalar(rng, n)?;
        let Some(x) = curve.multiply_generator(&k)?.x().cloned() else {
            continue;
        };
        let r = x % n;
        if r.is_zero() {
            continue;
        }
        let k_inv = mod_inv_prime(&k, n)?;
        let s = mod_mul(&k_inv, &mod_add(&e, &mod_mul(&r, private_key, n), n), n);
        if s.is_zero() {
            continue;
        }
        let len = curve.order_size();
        return Ok([i2os(&r, len)?, i2os(&s, len)?].concat());
    }
}

/// Verifies a plain ECDSA signature `r ‖ s` over a message digest.
///
/// # Errors
///
/// * `EmrtdError::MalformedInput` if the signature has the wrong length or
///   the public key is invalid.
pub fn ecdsa_verify(
    curve: &EcCurve,
    public_key: &EcPoint,
    digest: &[u8],
    signature: &[u8],
) -> Result<bool, EmrtdError> {
    let len = curve.order_size();
    if signature.len() != 2 * len {
        error!(
            "Plain ECDSA signature must be {} bytes, found {}",
            2 * len,
            signature.len()
        );
        return Err(EmrtdError::MalformedInput(format!(
            "plain ECDSA signature must be {} bytes, found {}",
            2 * len,
            signature.len()
        )));
    }
    curve.validate_public_point(public_key)?;

    let verified = match NamedCurve::infer(curve) {
        Some(NamedCurve::Secp256r1) => {
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&curve.encode_point(public_key)?)
                .map_err(ecdsa_error)?;
            p256::ecdsa::Signature::from_slice(signature).is_ok_and(|signature| {
                key.verify_prehash(&prehash(digest, len), &signature).is_ok()
            })
        }
        Some(NamedCurve::Secp384r1) => {
            let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(&curve.encode_point(public_key)?)
                .map_err(ecdsa_error)?;
            p384::ecdsa::Signature::from_slice(signature).is_ok_and(|signature| {
                key.verify_prehash(&prehash(digest, len), &signature).is_ok()
            })
        }
        _ => generic_ecdsa_verify(curve, public_key, digest, signature)?,
    };
    Ok(verified)
}

fn generic_ecdsa_verify(
    curve: &EcCurve,
    public_key: &EcPoint,
    digest: &[u8],
    signature: &[u8],
) -> Result<bool, EmrtdError> {
    let len = curve.order_size();
    let n = &curve.n;
    let r = os2i(&signature[..len]);
    let s = os2i(&signature[len..]);
    if r.is_zero() || s.is_zero() || r >= *n || s >= *n {
        trace!("ECDSA signature values out of range");
        return Ok(false);
    }
    let e = digest_to_scalar(curve, digest);
    let w = mod_inv_prime(&s, n)?;
    let u1 = mod_mul(&e, &w, n);
    let u2 = mod_mul(&r, &w, n);
    let point = curve.add(
        &curve.multiply_generator(&u1)?,
        &curve.multiply(public_key, &u2)?,
    )?;
    Ok(point.x().is_some_and(|x| x % n == r))
}
