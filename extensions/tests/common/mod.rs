use std::path::Path;

use lectern_core::archive;
use lectern_core::document::Persistable;

pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Writes `items` as a gzipped tar with one `<kind dir>/<id>.json` entry per item.
pub async fn write_archive(path: &Path, items: &[Persistable]) {
    let staging = tempfile::tempdir().unwrap();
    for item in items {
        let dir = staging.path().join(item.kind().dir_name());
        std::fs::create_dir_all(&dir).unwrap();
        let json = serde_json::to_vec_pretty(item).unwrap();
        std::fs::write(dir.join(format!("{}.json", item.id())), json).unwrap();
    }
    archive::pack_directory(staging.path(), path).await.unwrap();
}
