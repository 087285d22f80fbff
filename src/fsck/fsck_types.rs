/// Outcome of a check run. `errors` holds one line per problem found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsckReport {
    pub blocks_ok: bool,
    pub inodes_ok: bool,
    pub dirs_ok: bool,
    pub errors: Vec<String>,
}

impl FsckReport {
    pub fn new() -> Self {
        Self {
            blocks_ok: true,
            inodes_ok: true,
            dirs_ok: true,
            errors: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Default for FsckReport {
    fn default() -> Self {
        Self::new()
    }
}
