use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::construct::RecordKeeper;
use crate::error::Result;
use crate::tablegen::Engine;

/// Owns the one keeper built from a source text. There is no session without
/// a successful parse, and dropping the session drops every record.
#[derive(Debug)]
pub struct Session {
    include_paths: Vec<PathBuf>,
    keeper: Arc<RecordKeeper>,
}

impl Session {
    pub fn open<P: Into<PathBuf>>(
        source: &str,
        include_paths: impl IntoIterator<Item = P>,
    ) -> Result<Self> {
        let include_paths: Vec<PathBuf> = include_paths.into_iter().map(Into::into).collect();
        debug!(includes = include_paths.len(), "opening session");
        let keeper = Engine::new(&include_paths).parse(source)?;
        Ok(Self {
            include_paths,
            keeper: keeper.into_shared(),
        })
    }
    /// Like [`Session::open`], naming the source in error locations.
    pub fn open_named<P: Into<PathBuf>>(
        name: &str,
        source: &str,
        include_paths: impl IntoIterator<Item = P>,
    ) -> Result<Self> {
        let include_paths: Vec<PathBuf> = include_paths.into_iter().map(Into::into).collect();
        let keeper = Engine::new(&include_paths)
            .with_file_name(name)
            .parse(source)?;
        Ok(Self {
            include_paths,
            keeper: keeper.into_shared(),
        })
    }
    pub fn record_keeper(&self) -> &RecordKeeper {
        &self.keeper
    }
    pub fn include_paths(&self) -> &[PathBuf] {
        &self.include_paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn sessions_can_be_shared_between_threads() {
        assert_send_sync::<Session>();
        assert_send_sync::<RecordKeeper>();
    }
}
