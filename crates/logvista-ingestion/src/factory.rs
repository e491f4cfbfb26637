use crate::{DirectoryIngestor, FileIngestor, JournalIngestor};
use logvista_core::{IngestionError, Source, SourceDescriptor, SourceKind};
use std::sync::Arc;
use tracing::debug;

/// Build the ingestor matching a descriptor's kind.
///
/// The descriptor is validated first; nothing is opened or spawned until
/// `Source::start` is called.
pub fn build_source(descriptor: SourceDescriptor) -> Result<Arc<dyn Source>, IngestionError> {
    descriptor.validate()?;
    debug!(source = %descriptor.name, kind = %descriptor.kind, "Building ingestor");

    let source: Arc<dyn Source> = match descriptor.kind {
        SourceKind::Journal => Arc::new(JournalIngestor::new(descriptor)),
        SourceKind::File => Arc::new(FileIngestor::new(descriptor)),
        SourceKind::Directory => Arc::new(DirectoryIngestor::new(descriptor)),
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_each_kind() {
        for descriptor in [
            SourceDescriptor::journal("journal"),
            SourceDescriptor::file("file", "/var/log/syslog"),
            SourceDescriptor::directory("dir", "/var/log").with_glob("*.log"),
        ] {
            let name = descriptor.name.clone();
            let source = build_source(descriptor).unwrap();
            assert_eq!(source.name(), name);
            assert!(!source.healthy());
        }
    }

    #[test]
    fn test_rejects_invalid_descriptor() {
        let mut descriptor = SourceDescriptor::file("file", "/var/log/syslog");
        descriptor.path = None;
        assert!(matches!(
            build_source(descriptor),
            Err(IngestionError::InvalidSource { .. })
        ));
    }
}
