//! Bit layout and packing for the Snowflake-style payload.
//!
//! Unlike a compile-time bit-width scheme, field widths here are validated
//! and turned into shifts/masks once, at construction, since the spec allows
//! them to be configured per deployment rather than fixed per Rust type.

/// Default field widths, matching the classic Snowflake/Twitter layout.
pub const DEFAULT_TIMESTAMP_BITS: u8 = 41;
pub const DEFAULT_DATACENTER_BITS: u8 = 5;
pub const DEFAULT_WORKER_BITS: u8 = 5;
pub const DEFAULT_SEQUENCE_BITS: u8 = 12;

/// Computed shifts and masks for a given bit-width partition of the 63
/// payload bits below the sign bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    timestamp_bits: u8,
    datacenter_bits: u8,
    worker_bits: u8,
    sequence_bits: u8,

    timestamp_shift: u32,
    datacenter_shift: u32,
    worker_shift: u32,

    timestamp_mask: i64,
    datacenter_mask: i64,
    worker_mask: i64,
    sequence_mask: i64,
}

impl Layout {
    /// Builds a layout from field widths, in bits, for (timestamp,
    /// datacenter, worker, sequence) respectively.
    ///
    /// # Errors
    /// Returns a descriptive error string (the caller wraps it in
    /// `Error::ConfigInvalid`) if any width is zero, if the widths sum to
    /// more than 63, or if the resulting layout could ever set bit 63 of a
    /// packed value.
    pub fn new(
        timestamp_bits: u8,
        datacenter_bits: u8,
        worker_bits: u8,
        sequence_bits: u8,
    ) -> Result<Self, String> {
        if timestamp_bits == 0
            || datacenter_bits == 0
            || worker_bits == 0
            || sequence_bits == 0
        {
            return Err("all field widths must be greater than zero".to_string());
        }

        let total = u16::from(timestamp_bits)
            + u16::from(datacenter_bits)
            + u16::from(worker_bits)
            + u16::from(sequence_bits);
        if total > 63 {
            return Err(format!(
                "field widths sum to {total} bits, which exceeds the 63 payload bits available"
            ));
        }

        let worker_shift = u32::from(sequence_bits);
        let datacenter_shift = worker_shift + u32::from(worker_bits);
        let timestamp_shift = datacenter_shift + u32::from(datacenter_bits);

        // `total <= 63` already guarantees bit 63 (the sign bit) can never be
        // set by a valid packing, but we assert it here so a future change to
        // the arithmetic above can't silently regress it.
        debug_assert!(timestamp_shift + u32::from(timestamp_bits) <= 63);

        Ok(Self {
            timestamp_bits,
            datacenter_bits,
            worker_bits,
            sequence_bits,
            timestamp_shift,
            datacenter_shift,
            worker_shift,
            timestamp_mask: (1i64 << timestamp_bits) - 1,
            datacenter_mask: (1i64 << datacenter_bits) - 1,
            worker_mask: (1i64 << worker_bits) - 1,
            sequence_mask: (1i64 << sequence_bits) - 1,
        })
    }

    pub fn default_layout() -> Self {
        Self::new(
            DEFAULT_TIMESTAMP_BITS,
            DEFAULT_DATACENTER_BITS,
            DEFAULT_WORKER_BITS,
            DEFAULT_SEQUENCE_BITS,
        )
        .expect("default layout is always valid")
    }

    pub fn max_timestamp_delta(&self) -> i64 {
        self.timestamp_mask
    }

    pub fn max_datacenter_id(&self) -> i64 {
        self.datacenter_mask
    }

    pub fn max_worker_id(&self) -> i64 {
        self.worker_mask
    }

    pub fn max_sequence(&self) -> i64 {
        self.sequence_mask
    }

    pub fn sequence_bits(&self) -> u8 {
        self.sequence_bits
    }

    pub fn timestamp_bits(&self) -> u8 {
        self.timestamp_bits
    }

    pub fn datacenter_bits(&self) -> u8 {
        self.datacenter_bits
    }

    pub fn worker_bits(&self) -> u8 {
        self.worker_bits
    }

    /// Packs components into a signed 64-bit payload. The sign bit is always
    /// zero for arguments within range.
    ///
    /// Out-of-range arguments are a programming error, not a recoverable
    /// condition: callers (the generator and the coordinator boundary) are
    /// responsible for keeping each component within its field's range.
    pub fn pack(&self, ts_delta: i64, datacenter_id: i64, worker_id: i64, sequence: i64) -> i64 {
        debug_assert!((0..=self.timestamp_mask).contains(&ts_delta));
        debug_assert!((0..=self.datacenter_mask).contains(&datacenter_id));
        debug_assert!((0..=self.worker_mask).contains(&worker_id));
        debug_assert!((0..=self.sequence_mask).contains(&sequence));

        ((ts_delta & self.timestamp_mask) << self.timestamp_shift)
            | ((datacenter_id & self.datacenter_mask) << self.datacenter_shift)
            | ((worker_id & self.worker_mask) << self.worker_shift)
            | (sequence & self.sequence_mask)
    }

    /// Unpacks a non-negative payload into `(ts_delta, datacenter_id,
    /// worker_id, sequence)`. The caller must reject negative input before
    /// calling this (the packer itself doesn't know an id was meant to be
    /// parsed rather than freshly minted).
    pub fn unpack(&self, id: i64) -> (i64, i64, i64, i64) {
        let ts_delta = (id >> self.timestamp_shift) & self.timestamp_mask;
        let datacenter_id = (id >> self.datacenter_shift) & self.datacenter_mask;
        let worker_id = (id >> self.worker_shift) & self.worker_mask;
        let sequence = id & self.sequence_mask;
        (ts_delta, datacenter_id, worker_id, sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_matches_twitter_snowflake() {
        let layout = Layout::default_layout();
        assert_eq!(layout.max_timestamp_delta(), (1i64 << 41) - 1);
        assert_eq!(layout.max_datacenter_id(), 31);
        assert_eq!(layout.max_worker_id(), 31);
        assert_eq!(layout.max_sequence(), 4095);
    }

    #[test]
    fn pack_unpack_round_trips() {
        let layout = Layout::default_layout();
        let id = layout.pack(123_456, 7, 11, 999);
        assert_eq!(layout.unpack(id), (123_456, 7, 11, 999));
        assert!(id >= 0);
    }

    #[test]
    fn zero_width_field_is_rejected() {
        assert!(Layout::new(41, 5, 5, 0).is_err());
        assert!(Layout::new(0, 5, 5, 12).is_err());
    }

    #[test]
    fn widths_over_63_bits_are_rejected() {
        assert!(Layout::new(50, 10, 10, 12).is_err());
    }

    #[test]
    fn maximal_valid_layout_never_sets_sign_bit() {
        // 40 + 11 + 11 + 1 == 63: the largest layout that fully uses the
        // payload without a zero-width field.
        let layout = Layout::new(40, 11, 11, 1).unwrap();
        let id = layout.pack(
            layout.max_timestamp_delta(),
            layout.max_datacenter_id(),
            layout.max_worker_id(),
            layout.max_sequence(),
        );
        assert!(id >= 0, "packed id must never set the sign bit");
    }
}
