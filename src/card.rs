//! The APDU transceiver capability.
//!
//! Everything above this module talks to the chip only through
//! [`CardTransceiver`]. The PC/SC implementation is [`PcscTransceiver`].

use alloc::{ffi::CString, vec::Vec};
use pcsc::{Attribute::AtrString, Card, Context, Disposition, Protocols, ShareMode};
use tracing::{error, info, trace, warn};

use crate::{bytes2hex, EmrtdError};

/// Raw command/response exchange with a contactless chip.
///
/// Implementations are not re-entrant; callers serialize access (see
/// [`crate::PassportService`]).
pub trait CardTransceiver {
    /// Connects to the chip. Opening an already open transceiver is a no-op.
    ///
    /// # Errors
    ///
    /// Transport specific failure.
    fn open(&mut self) -> Result<(), EmrtdError>;

    /// Disconnects from the chip. Closing a closed transceiver is a no-op.
    fn close(&mut self);

    /// Whether [`CardTransceiver::open`] succeeded and the transceiver was not closed since.
    fn is_open(&self) -> bool;

    /// Sends raw command APDU bytes and returns the raw response bytes (data ‖ SW1 SW2).
    ///
    /// # Errors
    ///
    /// Transport specific failure.
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, EmrtdError>;

    /// Retrieves the Answer to Reset (ATR) or ATS historical bytes of the chip.
    ///
    /// # Errors
    ///
    /// Transport specific failure.
    fn get_atr(&mut self) -> Result<Vec<u8>, EmrtdError>;

    /// Whether `error` means the chip is gone (removed, reset or unpowered).
    fn is_connection_lost(&self, error: &EmrtdError) -> bool {
        matches!(error, EmrtdError::CardNotOpen)
    }
}

/// A PC/SC reader connection.
pub struct PcscTransceiver {
    /// The PC/SC context the reader belongs to.
    ctx: Context,
    /// Name of the reader the card is in.
    reader: CString,
    /// The connected card, `None` while closed.
    card: Option<Card>,
}

impl PcscTransceiver {
    /// Creates a closed transceiver for the given reader.
    #[must_use]
    pub fn new(ctx: Context, reader: CString) -> Self {
        Self {
            ctx,
            reader,
            card: None,
        }
    }

    /// Wraps an already connected card.
    #[must_use]
    pub fn from_card(ctx: Context, reader: CString, card: Card) -> Self {
        Self {
            ctx,
            reader,
            card: Some(card),
        }
    }

    fn card(&self) -> Result<&Card, EmrtdError> {
        self.card.as_ref().ok_or_else(|| {
            error!("PC/SC card is not connected");
            EmrtdError::CardNotOpen
        })
    }
}

impl CardTransceiver for PcscTransceiver {
    fn open(&mut self) -> Result<(), EmrtdError> {
        if self.card.is_some() {
            return Ok(());
        }
        info!("Connecting to card in reader {:?}", self.reader);
        let card = self
            .ctx
            .connect(&self.reader, ShareMode::Shared, Protocols::ANY)
            .map_err(|err| {
                error!("Failed to connect to card: {err}");
                EmrtdError::PcscError(err)
            })?;
        self.card = Some(card);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(card) = self.card.take() {
            if let Err((_, err)) = card.disconnect(Disposition::ResetCard) {
                warn!("Failed to disconnect card cleanly: {err}");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.card.is_some()
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, EmrtdError> {
        let card = self.card()?;
        trace!("Transmitting: {}", bytes2hex(command));
        let mut response_buffer = [0; pcsc::MAX_BUFFER_SIZE_EXTENDED];
        match card.transmit(command, &mut response_buffer) {
            Ok(response) => {
                trace!("Received: {}", bytes2hex(response));
                Ok(response.to_vec())
            }
            Err(err) => {
                error!("PC/SC transmit failed: {err}");
                Err(EmrtdError::PcscError(err))
            }
        }
    }

    fn get_atr(&mut self) -> Result<Vec<u8>, EmrtdError> {
        self.card()?
            .get_attribute_owned(AtrString)
            .map_err(EmrtdError::PcscError)
    }

    fn is_connection_lost(&self, error: &EmrtdError) -> bool {
        matches!(
            error,
            EmrtdError::CardNotOpen
                | EmrtdError::PcscError(
                    pcsc::Error::RemovedCard
                        | pcsc::Error::ResetCard
                        | pcsc::Error::NoSmartcard
                        | pcsc::Error::UnpoweredCard
                        | pcsc::Error::UnresponsiveCard
                        | pcsc::Error::ReaderUnavailable
                        | pcsc::Error::CommError
                )
        )
    }
}
