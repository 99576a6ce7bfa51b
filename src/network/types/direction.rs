use std::fmt;

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted from a remote peer
    Inbound,

    /// Dialed by this node
    Outbound,
}

impl Direction {
    pub fn is_outbound(self) -> bool {
        self == Direction::Outbound
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}
