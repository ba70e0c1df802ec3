//! Small value types that appear in router descriptors.

pub use bwhistory::BandwidthHistory;
pub use fingerprint::Fingerprint;
pub use nickname::Nickname;

/// A type for relay nicknames
mod nickname {
    use crate::BuildError;

    /// This is a strange limit, but it comes from Tor.
    const MAX_NICKNAME_LEN: usize = 19;

    /// The nickname for a relay.
    ///
    /// Nicknames are a legacy mechanism that's occasionally useful in
    /// debugging. They should *never* be used to uniquely identify relays;
    /// nothing prevents two relays from having the same nickname.
    ///
    /// Nicknames are required to be ASCII, alphanumeric, and between 1 and 19
    /// characters inclusive.
    #[derive(
        Clone,
        Debug,
        PartialEq,
        Eq,
        Hash,
        serde_with::DeserializeFromStr,
        serde_with::SerializeDisplay,
    )]
    pub struct Nickname(String);

    impl Nickname {
        /// Return a view of this nickname as a string slice.
        pub fn as_str(&self) -> &str {
            self.0.as_str()
        }
    }

    impl std::fmt::Display for Nickname {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            self.as_str().fmt(f)
        }
    }

    impl std::str::FromStr for Nickname {
        type Err = BuildError;

        fn from_str(s: &str) -> Result<Self, BuildError> {
            let ok = !s.is_empty()
                && s.len() <= MAX_NICKNAME_LEN
                && s.bytes().all(|b| b.is_ascii_alphanumeric());
            if ok {
                Ok(Nickname(s.to_owned()))
            } else {
                Err(BuildError::BadNickname(s.to_owned()))
            }
        }
    }
}

/// Relay identity fingerprints
mod fingerprint {
    use crate::BuildError;
    use std::fmt::{self, Display};

    /// Length of an identity fingerprint, in bytes.
    const FINGERPRINT_LEN: usize = 20;

    /// The 20-byte identity digest of a relay.
    ///
    /// Written as 40 hexadecimal digits, with no spaces.  Parsing accepts
    /// either case; display is always uppercase.
    #[derive(
        Clone,
        Copy,
        Debug,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        derive_more::From,
        derive_more::Into,
        serde_with::DeserializeFromStr,
        serde_with::SerializeDisplay,
    )]
    pub struct Fingerprint([u8; FINGERPRINT_LEN]);

    impl Fingerprint {
        /// Construct a fingerprint from a slice of bytes, if it is the right
        /// length.
        pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
            Some(Fingerprint(bytes.try_into().ok()?))
        }

        /// Return the bytes of this fingerprint.
        pub fn as_bytes(&self) -> &[u8] {
            &self.0[..]
        }
    }

    impl std::str::FromStr for Fingerprint {
        type Err = BuildError;
        fn from_str(s: &str) -> Result<Fingerprint, BuildError> {
            let bad = || BuildError::BadFingerprint(s.to_owned());
            let bytes = hex::decode(s).map_err(|_| bad())?;
            Fingerprint::from_bytes(&bytes).ok_or_else(bad)
        }
    }

    impl Display for Fingerprint {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            Display::fmt(&hex::encode_upper(self.as_bytes()), f)
        }
    }
}

/// Read and write history
mod bwhistory {
    use std::time::{Duration, SystemTime};

    /// A record of how many bytes a relay moved in each of a series of
    /// equal intervals.
    ///
    /// `counts[i]` is the number of bytes moved during the interval that
    /// begins at `start + i * interval`.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct BandwidthHistory {
        /// Start of the first interval.
        start: SystemTime,
        /// Length of each interval.
        interval: Duration,
        /// Byte counts, one per interval, oldest first.
        counts: Vec<u64>,
    }

    impl BandwidthHistory {
        /// Construct a new history.
        pub fn new(start: SystemTime, interval: Duration, counts: Vec<u64>) -> Self {
            BandwidthHistory {
                start,
                interval,
                counts,
            }
        }

        /// Return the start of the first interval.
        pub fn start(&self) -> SystemTime {
            self.start
        }

        /// Return the length of each interval.
        pub fn interval(&self) -> Duration {
            self.interval
        }

        /// Return the byte counts, oldest first.
        pub fn counts(&self) -> &[u64] {
            &self.counts[..]
        }

        /// Return the end of the last interval.
        pub fn end(&self) -> SystemTime {
            let n = u32::try_from(self.counts.len()).unwrap_or(u32::MAX);
            self.start + self.interval.saturating_mul(n)
        }

        /// Return the total number of bytes recorded.
        pub fn total(&self) -> u64 {
            self.counts.iter().fold(0, |acc, n| acc.saturating_add(*n))
        }
    }
}
