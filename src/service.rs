//! The passport service: one connection to one chip.
//!
//! [`PassportService`] owns the transceiver, the current secure messaging
//! session and the file system behind one lock. Every protocol run happens
//! under that lock, and a successful run replaces the session in a single
//! assignment, so a file read never sees half of a key change.

use alloc::vec::Vec;
use rand::{rngs::OsRng, CryptoRng, RngCore};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::{
    active_auth::{do_aa, ActiveAuthPublicKey, ActiveAuthResult},
    bac::{do_bac, BacResult},
    card::CardTransceiver,
    chip_auth::{do_ca_with_key_pair, ChipAuthResult},
    file_system::{MrtdFileSystem, DEFAULT_MAX_READ_LENGTH},
    key_agreement::{DomainParameters, KeyPair, PublicKey},
    lds::EMRTD_AID,
    mrz::{AccessKey, BacKey, PaceKey},
    pace::{do_pace, PaceDomain, PaceResult},
    secure_messaging::SecureMessagingWrapper,
    sender::send_select_applet,
    terminal_auth::{do_ta, id_picc_from_bac, CvCertificate, TerminalAuthResult, TerminalSigner},
    EmrtdError,
};

/// Settings of a [`PassportService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Maximum number of bytes requested with one READ BINARY.
    pub max_read_length: usize,
    /// Whether response MACs are verified. Only for diagnosing broken chips.
    pub should_check_mac: bool,
    /// Whether the reader and chip support extended length APDUs.
    pub extended_length: bool,
    /// Whether files of the LDS are addressed by short file identifier.
    pub use_sfi: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_read_length: DEFAULT_MAX_READ_LENGTH,
            should_check_mac: true,
            extended_length: false,
            use_sfi: false,
        }
    }
}

struct State<C, R> {
    card: C,
    rng: R,
    wrapper: Option<SecureMessagingWrapper>,
    fs: MrtdFileSystem,
    /// Chip identifier that Terminal Authentication signs, set by BAC or PACE.
    id_picc: Option<Vec<u8>>,
}

impl<C, R> State<C, R> {
    fn end_session(&mut self) {
        self.wrapper = None;
        self.id_picc = None;
        self.fs.deselect();
    }
}

fn session<'a>(
    wrapper: &'a mut Option<SecureMessagingWrapper>,
    protocol: &str,
) -> Result<&'a mut SecureMessagingWrapper, EmrtdError> {
    wrapper.as_mut().ok_or_else(|| {
        error!("{protocol} needs a secure messaging session, run BAC or PACE first");
        EmrtdError::InvalidArgument("No secure messaging session")
    })
}

/// Access to the eMRTD application of one chip.
///
/// # Examples
///
/// ```no_run
/// use emrtd_access::{BacKey, EmrtdError, LdsFile, PassportService, PcscTransceiver};
///
/// fn main() -> Result<(), EmrtdError> {
///     let ctx = pcsc::Context::establish(pcsc::Scope::User).map_err(EmrtdError::PcscError)?;
///     let mut readers_buf = [0; 2048];
///     let reader = ctx
///         .list_readers(&mut readers_buf)
///         .map_err(EmrtdError::PcscError)?
///         .next()
///         .ok_or(EmrtdError::CardNotOpen)?
///         .to_owned();
///
///     let service: PassportService<_> = PassportService::new(PcscTransceiver::new(ctx, reader));
///     service.open()?;
///     service.send_select_applet()?;
///     service.do_bac(&BacKey::new("L898902C", "690806", "940623")?)?;
///     let dg1 = service.read_file(LdsFile::DataGroup(1).fid())?;
///     println!("DG1: {}", emrtd_access::bytes2hex(&dg1));
///     Ok(())
/// }
/// ```
pub struct PassportService<C: CardTransceiver, R: RngCore + CryptoRng + Default = OsRng> {
    config: ServiceConfig,
    state: Mutex<State<C, R>>,
}

impl<C: CardTransceiver, R: RngCore + CryptoRng + Default> PassportService<C, R> {
    /// A service with [`ServiceConfig::default`]. The transceiver is not opened.
    #[must_use]
    pub fn new(card: C) -> Self {
        Self::with_config(card, ServiceConfig::default())
    }

    #[must_use]
    pub fn with_config(card: C, config: ServiceConfig) -> Self {
        let mut fs = MrtdFileSystem::new(config.max_read_length, config.extended_length);
        fs.set_use_sfi(config.use_sfi);
        Self {
            config,
            state: Mutex::new(State {
                card,
                rng: R::default(),
                wrapper: None,
                fs,
                id_picc: None,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, State<C, R>>, EmrtdError> {
        self.state.lock().map_err(|_| {
            error!("Passport service lock is poisoned");
            EmrtdError::LockPoisoned
        })
    }

    fn lock_open(&self) -> Result<MutexGuard<'_, State<C, R>>, EmrtdError> {
        let state = self.lock()?;
        if !state.card.is_open() {
            error!("The transceiver is not open");
            return Err(EmrtdError::CardNotOpen);
        }
        Ok(state)
    }

    fn install(&self, state: &mut State<C, R>, wrapper: &mut SecureMessagingWrapper) {
        wrapper.set_should_check_mac(self.config.should_check_mac);
        state.wrapper = Some(wrapper.clone());
    }

    /// Opens the transceiver. Files cached from an earlier connection are
    /// dropped, since another document may be in the field now.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` if the transceiver can not connect.
    pub fn open(&self) -> Result<(), EmrtdError> {
        let mut state = self.lock()?;
        if state.card.is_open() {
            return Ok(());
        }
        state.card.open()?;
        state.end_session();
        state.fs.clear_cache();
        info!("Passport service opened");
        Ok(())
    }

    /// Closes the transceiver and drops the session.
    pub fn close(&self) {
        match self.lock() {
            Ok(mut state) => {
                state.card.close();
                state.end_session();
                info!("Passport service closed");
            }
            Err(_) => warn!("Passport service could not be closed"),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lock().is_ok_and(|state| state.card.is_open())
    }

    /// # Errors
    ///
    /// * `EmrtdError` on transport failure.
    pub fn get_atr(&self) -> Result<Vec<u8>, EmrtdError> {
        self.lock_open()?.card.get_atr()
    }

    /// A copy of the current secure messaging session, if any.
    #[must_use]
    pub fn wrapper(&self) -> Option<SecureMessagingWrapper> {
        self.lock().ok().and_then(|state| state.wrapper.clone())
    }

    /// Whether `error` means the chip is gone and the connection must be
    /// reopened.
    #[must_use]
    pub fn is_connection_lost(&self, error: &EmrtdError) -> bool {
        match self.lock() {
            Ok(state) => state.card.is_connection_lost(error),
            Err(_) => true,
        }
    }

    /// Selects the eMRTD application, through the session if there is one.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::RecvApduError` if the chip has no eMRTD application.
    pub fn send_select_applet(&self) -> Result<(), EmrtdError> {
        let mut guard = self.lock_open()?;
        let state = &mut *guard;
        state.fs.deselect();
        send_select_applet(&mut state.card, state.wrapper.as_mut(), &EMRTD_AID)
    }

    /// Selects an EF by file identifier.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::RecvApduError` if the file does not exist.
    pub fn send_select_file(&self, fid: u16) -> Result<(), EmrtdError> {
        let mut guard = self.lock_open()?;
        let state = &mut *guard;
        state.fs.deselect();
        state.fs.select_file(&mut state.card, state.wrapper.as_mut(), fid)
    }

    /// Runs BAC and installs the new session.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` as for [`crate::bac::do_bac`]. The previous session is
    ///   dropped, since the chip has left it as well.
    pub fn do_bac(&self, bac_key: &BacKey) -> Result<BacResult, EmrtdError> {
        let mut guard = self.lock_open()?;
        let state = &mut *guard;
        state.end_session();
        let mut result = do_bac(&mut state.card, bac_key, &mut state.rng)?;
        let id_picc = id_picc_from_bac(bac_key)?;
        self.install(state, &mut result.wrapper);
        state.id_picc = Some(id_picc);
        Ok(result)
    }

    /// Runs PACE and installs the new session.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` as for [`crate::pace::do_pace`]. The previous session
    ///   is dropped.
    pub fn do_pace(
        &self,
        pace_key: &PaceKey,
        oid: &str,
        domain: &PaceDomain,
    ) -> Result<PaceResult, EmrtdError> {
        let mut guard = self.lock_open()?;
        let state = &mut *guard;
        state.end_session();
        let mut result = do_pace(&mut state.card, pace_key, oid, domain, &mut state.rng)?;
        let id_picc = result.id_picc()?;
        self.install(state, &mut result.wrapper);
        state.id_picc = Some(id_picc);
        Ok(result)
    }

    /// Runs BAC or PACE, whichever `access_key` is for. A BAC key is used
    /// with BAC.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` as for [`PassportService::do_bac`] and [`PassportService::do_pace`].
    pub fn do_access_control(
        &self,
        access_key: &AccessKey,
        pace: Option<(&str, &PaceDomain)>,
    ) -> Result<SecureMessagingWrapper, EmrtdError> {
        match (access_key, pace) {
            (AccessKey::Bac(bac_key), None) => Ok(self.do_bac(bac_key)?.wrapper),
            (access_key, Some((oid, domain))) => {
                Ok(self.do_pace(&access_key.to_pace_key()?, oid, domain)?.wrapper)
            }
            (AccessKey::Pace(_), None) => {
                error!("PACE needs a protocol OID and domain parameters");
                Err(EmrtdError::InvalidArgument(
                    "PACE needs a protocol OID and domain parameters",
                ))
            }
        }
    }

    /// Runs Chip Authentication with a fresh terminal key pair and installs
    /// the new session.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` without a session.
    /// * `EmrtdError` as for [`crate::chip_auth::do_ca`]. The previous session
    ///   stays installed.
    pub fn do_ca(
        &self,
        oid: &str,
        key_id: Option<&[u8]>,
        parameters: &DomainParameters,
        chip_public_key: &PublicKey,
    ) -> Result<ChipAuthResult, EmrtdError> {
        let terminal_key_pair = {
            let mut state = self.lock_open()?;
            parameters.generate_key_pair(&mut state.rng)?
        };
        self.do_ca_with_key_pair(oid, key_id, parameters, chip_public_key, terminal_key_pair)
    }

    /// Runs Chip Authentication with the key pair Terminal Authentication
    /// committed to.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` as for [`PassportService::do_ca`].
    pub fn do_ca_with_key_pair(
        &self,
        oid: &str,
        key_id: Option<&[u8]>,
        parameters: &DomainParameters,
        chip_public_key: &PublicKey,
        terminal_key_pair: KeyPair,
    ) -> Result<ChipAuthResult, EmrtdError> {
        let mut guard = self.lock_open()?;
        let state = &mut *guard;
        let wrapper = session(&mut state.wrapper, "Chip Authentication")?;
        let mut result = do_ca_with_key_pair(
            &mut state.card,
            wrapper,
            oid,
            key_id,
            parameters,
            chip_public_key,
            terminal_key_pair,
        )?;
        self.install(state, &mut result.wrapper);
        Ok(result)
    }

    /// Runs Terminal Authentication in the current session.
    ///
    /// `ephemeral_key` is `Comp(PK_PCD)`: [`ChipAuthResult::key_hash`] after
    /// BAC and Chip Authentication, or the compressed key of the pair later
    /// passed to [`PassportService::do_ca_with_key_pair`] after PACE.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` without a session.
    /// * `EmrtdError` as for [`crate::terminal_auth::do_ta`].
    pub fn do_ta<S: TerminalSigner + ?Sized>(
        &self,
        certificates: &[CvCertificate],
        signer: &mut S,
        ephemeral_key: &[u8],
        auxiliary_data: Option<&[u8]>,
    ) -> Result<TerminalAuthResult, EmrtdError> {
        let mut guard = self.lock_open()?;
        let state = &mut *guard;
        let Some(id_picc) = state.id_picc.clone() else {
            error!("Terminal Authentication needs BAC or PACE first");
            return Err(EmrtdError::InvalidArgument("No secure messaging session"));
        };
        let wrapper = session(&mut state.wrapper, "Terminal Authentication")?;
        do_ta(
            &mut state.card,
            wrapper,
            certificates,
            signer,
            &id_picc,
            ephemeral_key,
            auxiliary_data,
        )
    }

    /// Runs Active Authentication, through the session if there is one.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` as for [`crate::active_auth::do_aa`].
    pub fn do_aa(
        &self,
        public_key: &ActiveAuthPublicKey,
        digest_oid: Option<&str>,
    ) -> Result<ActiveAuthResult, EmrtdError> {
        let mut guard = self.lock_open()?;
        let state = &mut *guard;
        do_aa(
            &mut state.card,
            state.wrapper.as_mut(),
            public_key,
            digest_oid,
            &mut state.rng,
        )
    }

    /// Reads a whole EF, through the session if there is one.
    ///
    /// # Errors
    ///
    /// * `EmrtdError` as for [`MrtdFileSystem::read_file`].
    pub fn read_file(&self, fid: u16) -> Result<Vec<u8>, EmrtdError> {
        let mut guard = self.lock_open()?;
        let state = &mut *guard;
        state.fs.read_file(&mut state.card, state.wrapper.as_mut(), fid)
    }
}
