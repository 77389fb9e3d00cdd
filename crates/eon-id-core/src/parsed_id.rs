/// The decoded fields of a generated id, as returned by
/// [`crate::Generator::parse_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParsedId {
    /// Absolute wall-clock time the id was minted at, in UNIX milliseconds
    /// (`custom_epoch + timestamp_delta`).
    pub timestamp_ms: i64,
    pub datacenter_id: i64,
    pub worker_id: i64,
    pub sequence: i64,
}
