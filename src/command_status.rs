//! Structured form of the CommandComplete tag.

/// Outcome of a completed command, parsed from its tag (e.g. `"INSERT 0 1"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Insert { oid: u32, row_count: u64 },
    Delete { row_count: u64 },
    Update { row_count: u64 },
    Select { row_count: u64 },
    Move { row_count: u64 },
    Fetch { row_count: u64 },
    /// `COPY n`; servers before 8.2 omit the count.
    Copy {
        source: Option<u64>,
        dest: Option<u64>,
    },
    /// EmptyQueryResponse
    Empty,
    /// Any other tag, kept verbatim (`BEGIN`, `CREATE TABLE`, ...)
    Unknown(String),
}

impl CommandStatus {
    /// Parse a command tag. Tags that do not fit a known shape are `Unknown`.
    pub fn parse(tag: &str) -> Self {
        let parts: Vec<&str> = tag.split_ascii_whitespace().collect();
        let count = |s: &str| s.parse::<u64>().ok();

        let parsed = match parts.as_slice() {
            ["INSERT", oid, rows] => oid
                .parse::<u32>()
                .ok()
                .zip(count(rows))
                .map(|(oid, row_count)| Self::Insert { oid, row_count }),
            ["DELETE", rows] => count(rows).map(|row_count| Self::Delete { row_count }),
            ["UPDATE", rows] => count(rows).map(|row_count| Self::Update { row_count }),
            ["SELECT", rows] => count(rows).map(|row_count| Self::Select { row_count }),
            ["MOVE", rows] => count(rows).map(|row_count| Self::Move { row_count }),
            ["FETCH", rows] => count(rows).map(|row_count| Self::Fetch { row_count }),
            ["COPY", rest @ ..] => {
                let mut numbers = rest.iter().filter_map(|s| count(s));
                Some(Self::Copy {
                    source: numbers.next(),
                    dest: numbers.next(),
                })
            }
            _ => None,
        };
        parsed.unwrap_or_else(|| Self::Unknown(tag.to_string()))
    }

    /// Number of rows affected or returned, when the tag carries one.
    pub fn row_count(&self) -> Option<u64> {
        match self {
            Self::Insert { row_count, .. }
            | Self::Delete { row_count }
            | Self::Update { row_count }
            | Self::Select { row_count }
            | Self::Move { row_count }
            | Self::Fetch { row_count } => Some(*row_count),
            Self::Copy { source, dest } => dest.or(*source),
            Self::Empty | Self::Unknown(_) => None,
        }
    }

    /// Command keyword, e.g. `"INSERT"` or `"CREATE"`.
    pub fn command_name(&self) -> &str {
        match self {
            Self::Insert { .. } => "INSERT",
            Self::Delete { .. } => "DELETE",
            Self::Update { .. } => "UPDATE",
            Self::Select { .. } => "SELECT",
            Self::Move { .. } => "MOVE",
            Self::Fetch { .. } => "FETCH",
            Self::Copy { .. } => "COPY",
            Self::Empty => "<empty>",
            Self::Unknown(tag) => tag.split_ascii_whitespace().next().unwrap_or("<unknown>"),
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert { oid, row_count } => write!(f, "INSERT {} {}", oid, row_count),
            Self::Copy { source, dest } => {
                f.write_str("COPY")?;
                for n in [source, dest].into_iter().flatten() {
                    write!(f, " {}", n)?;
                }
                Ok(())
            }
            Self::Empty => f.write_str("<empty>"),
            Self::Unknown(tag) => f.write_str(tag),
            other => write!(
                f,
                "{} {}",
                other.command_name(),
                other.row_count().unwrap_or_default()
            ),
        }
    }
}
