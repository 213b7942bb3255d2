use std::fmt;

/// Number of ledger heights in one full round cycle.
pub const SUB_ROUND_COUNT: u64 = 4;

/// Phase of the oracle round at a given ledger height.
///
/// This is the sole synchronization primitive between independent oracle
/// nodes: every node derives the phase from the same replicated ledger height,
/// so all of them agree on it without any peer-to-peer coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubRound {
    Commit,
    Reveal,
    Result,
    Relay,
}

impl SubRound {
    /// `height mod 4`, no side effects, no failure modes.
    pub fn from_height(ledger_height: u64) -> SubRound {
        match ledger_height % SUB_ROUND_COUNT {
            0 => SubRound::Commit,
            1 => SubRound::Reveal,
            2 => SubRound::Result,
            3 => SubRound::Relay,
            _ => unreachable!("remainder of division by four"),
        }
    }

    pub fn index(self) -> u64 {
        match self {
            SubRound::Commit => 0,
            SubRound::Reveal => 1,
            SubRound::Result => 2,
            SubRound::Relay => 3,
        }
    }
}

impl fmt::Display for SubRound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubRound::Commit => "commit",
            SubRound::Reveal => "reveal",
            SubRound::Result => "result",
            SubRound::Relay => "relay",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_cycle_order() {
        assert_eq!(
            (0..4).map(SubRound::from_height).collect::<Vec<_>>(),
            vec![
                SubRound::Commit,
                SubRound::Reveal,
                SubRound::Result,
                SubRound::Relay
            ]
        );
    }

    #[test]
    fn periodic_with_period_four() {
        for height in 0..256 {
            assert_eq!(
                SubRound::from_height(height),
                SubRound::from_height(height + SUB_ROUND_COUNT)
            );
            assert_eq!(SubRound::from_height(height).index(), height % 4);
        }
    }
}
