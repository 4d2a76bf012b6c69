//! Logical Data Structure file identifiers, ICAO Doc 9303-10 Section 3.

use tracing::error;

use crate::EmrtdError;

/// AID of the eMRTD application, `International AID`.
pub const EMRTD_AID: [u8; 7] = [0xA0, 0x00, 0x00, 0x02, 0x47, 0x10, 0x01];

/// Elementary files of the LDS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LdsFile {
    CardAccess,
    CardSecurity,
    Com,
    Sod,
    /// `DG1` to `DG16`.
    DataGroup(u8),
}

impl LdsFile {
    /// A data group by number.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` if `number` is not in `1..=16`.
    pub fn data_group(number: u8) -> Result<Self, EmrtdError> {
        if (1..=16).contains(&number) {
            Ok(Self::DataGroup(number))
        } else {
            error!("There is no data group {number}");
            Err(EmrtdError::InvalidArgument("Data group number must be in 1..=16"))
        }
    }

    /// File identifier.
    #[must_use]
    pub fn fid(&self) -> u16 {
        match self {
            Self::CardAccess => 0x011C,
            Self::CardSecurity | Self::Sod => 0x011D,
            Self::Com => 0x011E,
            Self::DataGroup(number) => 0x0100 | u16::from(*number),
        }
    }

    /// Short file identifier.
    #[must_use]
    pub fn sfi(&self) -> u8 {
        match self {
            Self::CardAccess => 0x1C,
            Self::CardSecurity | Self::Sod => 0x1D,
            Self::Com => 0x1E,
            Self::DataGroup(number) => *number,
        }
    }

    /// Whether the file lives in the master file rather than the eMRTD application.
    #[must_use]
    pub fn is_master_file(&self) -> bool {
        matches!(self, Self::CardAccess | Self::CardSecurity)
    }

    /// The application file with the given short file identifier.
    #[must_use]
    pub fn from_sfi(sfi: u8) -> Option<Self> {
        match sfi {
            0x01..=0x10 => Some(Self::DataGroup(sfi)),
            0x1D => Some(Self::Sod),
            0x1E => Some(Self::Com),
            _ => None,
        }
    }

    /// The application file with the given file identifier.
    #[must_use]
    pub fn from_fid(fid: u16) -> Option<Self> {
        match fid {
            0x0101..=0x0110 => u8::try_from(fid & 0xFF).ok().map(Self::DataGroup),
            0x011C => Some(Self::CardAccess),
            0x011D => Some(Self::Sod),
            0x011E => Some(Self::Com),
            _ => None,
        }
    }

    /// Name used in log messages, e.g. `EF.DG2`.
    #[must_use]
    pub fn name(&self) -> alloc::string::String {
        match self {
            Self::CardAccess => "EF.CardAccess".into(),
            Self::CardSecurity => "EF.CardSecurity".into(),
            Self::Com => "EF.COM".into(),
            Self::Sod => "EF.SOD".into(),
            Self::DataGroup(number) => alloc::format!("EF.DG{number}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_identifiers() -> Result<(), EmrtdError> {
        assert_eq!(LdsFile::Com.fid(), 0x011E);
        assert_eq!(LdsFile::CardAccess.sfi(), 0x1C);
        assert_eq!(LdsFile::data_group(1)?.fid(), 0x0101);
        assert_eq!(LdsFile::data_group(16)?.fid(), 0x0110);
        assert_eq!(LdsFile::data_group(14)?.sfi(), 0x0E);
        assert_eq!(LdsFile::Sod.fid(), LdsFile::CardSecurity.fid());
        assert!(LdsFile::data_group(0).is_err());
        assert!(LdsFile::data_group(17).is_err());
        Ok(())
    }

    #[test]
    fn test_lookup() {
        for number in 1..=16 {
            let file = LdsFile::DataGroup(number);
            assert_eq!(LdsFile::from_fid(file.fid()), Some(file));
            assert_eq!(LdsFile::from_sfi(file.sfi()), Some(file));
        }
        assert_eq!(LdsFile::from_sfi(0x1E), Some(LdsFile::Com));
        assert_eq!(LdsFile::from_fid(0x2F00), None);
        assert_eq!(LdsFile::DataGroup(2).name(), "EF.DG2");
        assert!(LdsFile::CardAccess.is_master_file());
    }
}
