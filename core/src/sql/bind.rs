use compact_str::{CompactString, format_compact};

/// Request-scoped source of unique bind names.
///
/// Names follow `{table}_{column}_{n}`; `n` increases with every name issued, so the same
/// column compared twice in one statement never collides.
#[derive(Debug, Default, Clone)]
pub struct BindCounter {
    issued: u32,
}

impl BindCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_name(&mut self, table: &str, column: &str) -> CompactString {
        self.issued += 1;
        format_compact!("{}_{}_{}", sanitize(table), sanitize(column), self.issued)
    }

    /// Number of names issued so far.
    pub fn issued(&self) -> u32 {
        self.issued
    }
}

fn sanitize(part: &str) -> CompactString {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
