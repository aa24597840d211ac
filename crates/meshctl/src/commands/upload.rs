use std::path::Path;

use common::{
    hash,
    protocol::{CommandTag, UploadMsg},
};
use tracing::debug;

use crate::{
    archiver::package_source,
    commands::{run, CommandError, Upload},
    dispatch::Invocation,
    transport::Transport,
};

/// Upload flow entrypoint.
pub(crate) async fn upload<T: Transport>(
    transport: &T,
    invocation: &Invocation,
    Upload { src }: Upload,
) -> Result<(), CommandError> {
    upload_source(transport, invocation, &src).await?;

    println!("Source code uploaded.");

    Ok(())
}

/// Package `src` and send it to the mesh for compilation.
///
/// Packaging happens before any mesh connection is made.
pub(crate) async fn upload_source<T: Transport>(
    transport: &T,
    invocation: &Invocation,
    src: &Path,
) -> Result<(), CommandError> {
    let zip_data = package_source(src)?;

    debug!(
        size = zip_data.len(),
        digest = %hash::archive_digest(&zip_data),
        "source code packaged"
    );

    run(transport, invocation, CommandTag::Upload, &UploadMsg { zip_data }).await
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{
        archiver::ArchiverError,
        commands::tests::{done, invocation},
        transport::memory::MemoryTransport,
    };

    #[tokio::test]
    async fn directory_is_archived_and_sent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.go"), "package main").unwrap();

        let transport = MemoryTransport::new().reply(CommandTag::Upload, vec![done("a")]);

        upload_source(&transport, &invocation(), dir.path())
            .await
            .unwrap();

        let published = transport.published();
        let envelope: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();

        assert_eq!(published[0].0, CommandTag::Upload.request_tag());
        assert!(envelope["msg"]["zip_data"].as_str().unwrap().starts_with("UEsD"));
    }

    #[tokio::test]
    async fn missing_source_never_connects() {
        let transport = MemoryTransport::new();

        let result = upload_source(&transport, &invocation(), Path::new("/nonexistent/src")).await;

        assert!(matches!(
            result,
            Err(CommandError::Archiver(ArchiverError::MissingSource(_)))
        ));
        assert!(transport.published().is_empty());
        assert_eq!(transport.closed_channels(), 0);
    }
}
