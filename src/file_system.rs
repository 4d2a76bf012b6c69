//! Reading elementary files of the eMRTD application.
//!
//! Files are read in blocks through the current secure messaging session.
//! Every byte read is kept in a per-file cache, so reading a range twice
//! only costs APDUs the first time.

use alloc::{collections::BTreeMap, format, vec, vec::Vec};
use tracing::{error, info, trace};

use crate::{
    apdu::{MAX_EXTENDED_NE, MAX_SHORT_NE},
    asn1::len2int,
    card::CardTransceiver,
    lds::LdsFile,
    secure_messaging::SecureMessagingWrapper,
    sender::{send_read_binary, send_read_binary_sfi, send_select_file},
    EmrtdError,
};

/// Bytes read to find the length of a file. Enough for a two byte tag and
/// a length of up to five bytes.
const HEADER_LENGTH: usize = 8;

/// Default maximum number of bytes requested with one READ BINARY. Fits a
/// secure messaging response into a short length APDU.
pub const DEFAULT_MAX_READ_LENGTH: usize = 223;

/// Longest file accepted from a header. The cache of a file is allocated
/// in one piece when its header is read.
pub const MAX_FILE_LENGTH: usize = 0x10_0000;

/// What is known about one elementary file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    fid: u16,
    length: usize,
    buffer: Vec<u8>,
    /// Sorted, disjoint `[start, end)` ranges of `buffer` that were read.
    fragments: Vec<(usize, usize)>,
}

impl FileInfo {
    #[must_use]
    pub fn new(fid: u16, length: usize) -> Self {
        Self {
            fid,
            length,
            buffer: vec![0; length],
            fragments: Vec::new(),
        }
    }

    #[must_use]
    pub fn fid(&self) -> u16 {
        self.fid
    }

    /// Total length of the file, from the length of its outer TLV object.
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Number of distinct bytes read so far.
    #[must_use]
    pub fn bytes_read(&self) -> usize {
        self.fragments.iter().map(|(start, end)| end - start).sum()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.bytes_read() == self.length
    }

    /// The whole file, once every byte was read.
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        self.is_complete().then_some(&self.buffer[..])
    }

    /// Stores bytes read at `offset`. Bytes past the end of the file are dropped.
    pub fn add_fragment(&mut self, offset: usize, data: &[u8]) {
        let end = offset.saturating_add(data.len()).min(self.length);
        if offset >= end {
            return;
        }
        self.buffer[offset..end].copy_from_slice(&data[..end - offset]);
        self.fragments.push((offset, end));
        self.fragments.sort_unstable();

        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(self.fragments.len());
        for (start, end) in self.fragments.drain(..) {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        self.fragments = merged;
    }

    /// First range inside `[offset, end)` that was not read yet.
    #[must_use]
    pub fn first_gap(&self, offset: usize, end: usize) -> Option<(usize, usize)> {
        let end = end.min(self.length);
        let mut start = offset;
        for &(fragment_start, fragment_end) in &self.fragments {
            if start >= end {
                return None;
            }
            if fragment_end <= start {
                continue;
            }
            if fragment_start > start {
                return Some((start, fragment_start.min(end)));
            }
            start = fragment_end;
        }
        (start < end).then_some((start, end))
    }
}

/// Selection state and file cache of one chip.
#[derive(Debug, Clone)]
pub struct MrtdFileSystem {
    max_read_length: usize,
    extended_length: bool,
    /// Read file headers with short file identifiers instead of SELECT.
    use_sfi: bool,
    selected: Option<u16>,
    files: BTreeMap<u16, FileInfo>,
}

impl Default for MrtdFileSystem {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_READ_LENGTH, false)
    }
}

impl MrtdFileSystem {
    /// `max_read_length` is clamped to what one READ BINARY can return.
    #[must_use]
    pub fn new(max_read_length: usize, extended_length: bool) -> Self {
        let mut fs = Self {
            max_read_length,
            extended_length,
            use_sfi: false,
            selected: None,
            files: BTreeMap::new(),
        };
        fs.set_max_read_length(max_read_length);
        fs
    }

    #[must_use]
    pub fn max_read_length(&self) -> usize {
        self.max_read_length
    }

    pub fn set_max_read_length(&mut self, max_read_length: usize) {
        let limit = if self.extended_length {
            MAX_EXTENDED_NE
        } else {
            MAX_SHORT_NE
        };
        self.max_read_length = max_read_length.clamp(1, limit);
    }

    #[must_use]
    pub fn use_sfi(&self) -> bool {
        self.use_sfi
    }

    /// With `use_sfi` the first READ BINARY of a file of the LDS addresses
    /// it by short file identifier, which selects it on the chip as well.
    pub fn set_use_sfi(&mut self, use_sfi: bool) {
        self.use_sfi = use_sfi;
    }

    #[must_use]
    pub fn selected_file(&self) -> Option<u16> {
        self.selected
    }

    /// Forgets the selected file, e.g. after an application was selected.
    /// Cached file contents stay valid.
    pub fn deselect(&mut self) {
        self.selected = None;
    }

    #[must_use]
    pub fn file_info(&self, fid: u16) -> Option<&FileInfo> {
        self.files.get(&fid)
    }

    /// Forgets every cached file, for when the chip may have changed.
    pub fn clear_cache(&mut self) {
        self.selected = None;
        self.files.clear();
    }

    /// Selects an EF unless it is selected already.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::RecvApduError` if the file does not exist.
    pub fn select_file<C: CardTransceiver + ?Sized>(
        &mut self,
        card: &mut C,
        wrapper: Option<&mut SecureMessagingWrapper>,
        fid: u16,
    ) -> Result<(), EmrtdError> {
        if self.selected == Some(fid) {
            return Ok(());
        }
        self.selected = None;
        send_select_file(card, wrapper, fid)?;
        self.selected = Some(fid);
        Ok(())
    }

    /// Reads a whole file, from the cache if it was read before.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::RecvApduError` if the chip rejects a SELECT or READ BINARY.
    /// * `EmrtdError::ParseAsn1DataError` if the file does not start with a TLV header.
    /// * `EmrtdError::MalformedInput` if the header announces more than
    ///   [`MAX_FILE_LENGTH`] bytes.
    /// * `EmrtdError` on transport or secure messaging failures.
    pub fn read_file<C: CardTransceiver + ?Sized>(
        &mut self,
        card: &mut C,
        mut wrapper: Option<&mut SecureMessagingWrapper>,
        fid: u16,
    ) -> Result<Vec<u8>, EmrtdError> {
        let file = LdsFile::from_fid(fid);
        let name = file.map_or_else(|| alloc::format!("EF {fid:04X}"), |file| file.name());
        if let Some(data) = self.files.get(&fid).and_then(FileInfo::data) {
            trace!("Serving {name} from the cache");
            return Ok(data.to_vec());
        }
        match file {
            Some(file)
                if self.use_sfi
                    && self.selected != Some(fid)
                    && !self.files.contains_key(&fid) =>
            {
                trace!(
                    "Reading first {HEADER_LENGTH} bytes of {name} by SFI {:02X}...",
                    file.sfi()
                );
                self.selected = None;
                let header = send_read_binary_sfi(
                    card,
                    wrapper.as_deref_mut(),
                    file.sfi(),
                    0,
                    HEADER_LENGTH,
                )?;
                self.selected = Some(fid);
                self.files.insert(fid, file_info_from_header(fid, &header)?);
            }
            _ => self.select_file(card, wrapper.as_deref_mut(), fid)?,
        }
        let data = self.read_binary(card, wrapper, 0, usize::MAX)?;
        info!("Read {} bytes of {name}", data.len());
        Ok(data)
    }

    /// Reads up to `length` bytes at `offset` of the selected file. The
    /// result is shorter when the file ends first.
    ///
    /// # Errors
    ///
    /// * `EmrtdError::InvalidArgument` if no file is selected or `offset` is
    ///   past the end of the file.
    /// * `EmrtdError` as for [`MrtdFileSystem::read_file`].
    pub fn read_binary<C: CardTransceiver + ?Sized>(
        &mut self,
        card: &mut C,
        mut wrapper: Option<&mut SecureMessagingWrapper>,
        offset: usize,
        length: usize,
    ) -> Result<Vec<u8>, EmrtdError> {
        let Some(fid) = self.selected else {
            error!("READ BINARY without a selected file");
            return Err(EmrtdError::InvalidArgument("No file is selected"));
        };
        if !self.files.contains_key(&fid) {
            let info = self.read_header(card, wrapper.as_deref_mut(), fid)?;
            self.files.insert(fid, info);
        }
        let (max_read_length, extended_length) = (self.max_read_length, self.extended_length);
        let info = self
            .files
            .get_mut(&fid)
            .ok_or(EmrtdError::InvalidResponseError())?;
        if offset > info.length() {
            error!("Offset {offset} is past the end of EF {fid:04X} ({} bytes)", info.length());
            return Err(EmrtdError::InvalidArgument("Offset is past the end of the file"));
        }
        let end = offset.saturating_add(length).min(info.length());

        while let Some((start, gap_end)) = info.first_gap(offset, end) {
            let le = (gap_end - start).min(max_read_length);
            trace!("Reading {le} bytes at offset {start} of EF {fid:04X}...");
            let data = send_read_binary(card, wrapper.as_deref_mut(), start, le, extended_length)?;
            if data.is_empty() {
                error!("Requested bytes while reading EF but received 0 bytes.");
                return Err(EmrtdError::InvalidResponseError());
            }
            info.add_fragment(start, &data);
        }
        Ok(info.buffer[offset..end].to_vec())
    }

    fn read_header<C: CardTransceiver + ?Sized>(
        &self,
        card: &mut C,
        wrapper: Option<&mut SecureMessagingWrapper>,
        fid: u16,
    ) -> Result<FileInfo, EmrtdError> {
        trace!("Reading first {HEADER_LENGTH} bytes of EF {fid:04X}...");
        let header = send_read_binary(card, wrapper, 0, HEADER_LENGTH, self.extended_length)?;
        file_info_from_header(fid, &header)
    }
}

/// Sizes a file from the TLV header at its start.
fn file_info_from_header(fid: u16, header: &[u8]) -> Result<FileInfo, EmrtdError> {
    // Multi-byte tags such as 5F1F or 7F61 have all low five bits set
    let tag_len = match header.first() {
        Some(tag) if tag & 0x1F == 0x1F => 2,
        _ => 1,
    };
    let (header_len, value_len) = len2int(header, tag_len)?;
    let length = header_len
        .checked_add(value_len)
        .filter(|length| *length <= MAX_FILE_LENGTH)
        .ok_or_else(|| {
            error!("EF {fid:04X} announces {value_len} bytes, more than {MAX_FILE_LENGTH}");
            EmrtdError::MalformedInput(format!("EF {fid:04X} is too long"))
        })?;
    trace!("EF {fid:04X} is {length} bytes long");
    let mut info = FileInfo::new(fid, length);
    info.add_fragment(0, header);
    Ok(info)
}
