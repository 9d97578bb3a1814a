pub mod bit;
pub mod cfg;
pub mod corr;
pub mod counts;
pub mod de;
pub mod period;
pub mod rec;
pub mod ser;

/// Number of timestamp words per channel in one hardware record
pub const SLOTS: usize = 6;

/// One decoded hardware record
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct PhotonRecord {
    /// Hardware packet counter, not necessarily contiguous
    pub sequence_id: u16,
    /// Hardware-asserted validity; invalid records never reach period assembly
    pub valid: bool,
    /// Marks the first record of a new acquisition period
    pub period_flag: bool,
    pub pos_edge: bool,
    pub neg_edge: bool,
    /// Auxiliary photon counters (bytes 6-9)
    pub photon_counts: [u16; 2],
    /// Edge-polarity counters, width depends on the decode profile
    pub pos_count: u32,
    pub neg_count: u32,
    /// Arrival times in ns, relative to an arbitrary per-period epoch.
    /// Zero slots are padding and are kept as decoded.
    pub channel_a_timestamps: [f64; SLOTS],
    pub channel_b_timestamps: [f64; SLOTS],
}

/// A completed pairing of channel A and channel B arrival times
#[derive(Clone, PartialEq, Debug, Default)]
pub struct PeriodRecord {
    pub channel_a: Vec<f64>,
    pub channel_b: Vec<f64>,
}

/// Representation for two-dimensional data like histograms, etc.
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug)]
pub struct Bin<T, U>
where
    T: std::str::FromStr,
    U: std::str::FromStr,
{
    pub x: T,
    pub y: U,
}
