//! Backup archive: a zstd-compressed tar stream.
//!
//! Layout:
//!
//! ```text
//! metadata/version
//! resources/<resource>[.<group>]/namespaces/<namespace>/<name>.json
//! resources/<resource>[.<group>]/cluster/<name>.json
//! ```
//!
//! Entries appear in the order items were finalized.

use crate::model::{GroupResource, ResourceIdentifier, ResourceItem};
use crate::utils::errors::ArchiveError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::io::{Read, Write};

pub const VERSION_PATH: &str = "metadata/version";
pub const FORMAT_VERSION: &str = "1";

/// Directory holding every item of one resource type.
pub fn resource_dir(gr: &GroupResource) -> String {
    format!("resources/{gr}")
}

pub fn item_path(id: &ResourceIdentifier) -> String {
    let dir = resource_dir(&id.group_resource);
    if id.is_namespaced() {
        format!("{dir}/namespaces/{}/{}.json", id.namespace, id.name)
    } else {
        format!("{dir}/cluster/{}.json", id.name)
    }
}

pub struct ArchiveWriter<W: Write> {
    builder: tar::Builder<zstd::stream::write::Encoder<'static, W>>,
    mtime: u64,
    entries: usize,
}

impl<W: Write> ArchiveWriter<W> {
    /// Start an archive; the version marker is written immediately.
    pub fn new(writer: W, compression_level: i32, created: DateTime<Utc>) -> Result<Self, ArchiveError> {
        let encoder = zstd::stream::write::Encoder::new(writer, compression_level)?;
        let mut archive = Self {
            builder: tar::Builder::new(encoder),
            mtime: created.timestamp().max(0) as u64,
            entries: 0,
        };
        archive.append(VERSION_PATH, FORMAT_VERSION.as_bytes())?;
        Ok(archive)
    }

    fn append(&mut self, path: &str, data: &[u8]) -> Result<(), ArchiveError> {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(self.mtime);
        self.builder.append_data(&mut header, path, data)?;
        self.entries += 1;
        Ok(())
    }

    /// Write `item` under the path of `id`. The two may disagree when an
    /// action renamed the item; the path always follows `id`.
    pub fn write_item(
        &mut self,
        id: &ResourceIdentifier,
        item: &ResourceItem,
    ) -> Result<String, ArchiveError> {
        let path = item_path(id);
        let data = serde_json::to_vec(&item.object)?;
        self.append(&path, &data)?;
        Ok(path)
    }

    /// Entries written so far, version marker included.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Flush the tar trailer and the compression frame; hands back the sink.
    pub fn finish(self) -> Result<W, ArchiveError> {
        let encoder = self.builder.into_inner()?;
        Ok(encoder.finish()?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    pub path: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn json(&self) -> Result<Value, ArchiveError> {
        Ok(serde_json::from_slice(&self.data)?)
    }
}

/// Decode a whole archive into its entries, in stored order.
pub fn read_entries<R: Read>(reader: R) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let decoder = zstd::stream::read::Decoder::new(reader)?;
    let mut archive = tar::Archive::new(decoder);
    let mut entries = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        entries.push(ArchiveEntry { path, data });
    }

    match entries.first() {
        Some(first) if first.path == VERSION_PATH => Ok(entries),
        _ => Err(ArchiveError::InvalidEntry(format!(
            "archive does not start with {VERSION_PATH}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_paths() {
        let pod = ResourceIdentifier::new(GroupResource::pods(), "ns-1", "pod-1");
        assert_eq!(item_path(&pod), "resources/pods/namespaces/ns-1/pod-1.json");

        let deploy = ResourceIdentifier::new(GroupResource::new("apps", "deployments"), "ns-1", "web");
        assert_eq!(
            item_path(&deploy),
            "resources/deployments.apps/namespaces/ns-1/web.json"
        );

        let pv = ResourceIdentifier::cluster_scoped(GroupResource::persistent_volumes(), "pv-1");
        assert_eq!(item_path(&pv), "resources/persistentvolumes/cluster/pv-1.json");
    }

    #[test]
    fn test_write_and_read_back() {
        let object = json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"namespace": "ns-1", "name": "renamed"}, "zeta": 1, "alpha": 2});
        let item = ResourceItem::from_value(GroupResource::pods(), object.clone()).unwrap();
        let id = ResourceIdentifier::new(GroupResource::pods(), "ns-1", "pod-1");

        let mut writer = ArchiveWriter::new(Vec::new(), 3, Utc::now()).unwrap();
        let path = writer.write_item(&id, &item).unwrap();
        assert_eq!(writer.entries(), 2);
        let bytes = writer.finish().unwrap();

        let entries = read_entries(bytes.as_slice()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, VERSION_PATH);
        assert_eq!(entries[0].data, b"1");
        assert_eq!(entries[1].path, path);
        assert_eq!(entries[1].json().unwrap(), object);

        // Field order survives.
        let text = String::from_utf8(entries[1].data.clone()).unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
    }

    #[test]
    fn test_long_paths() {
        let name = "x".repeat(200);
        let id = ResourceIdentifier::new(GroupResource::new("example.com", "widgets"), "ns", &name);
        let item = ResourceItem::from_value(id.group_resource.clone(), json!({"metadata": {"name": name}})).unwrap();

        let mut writer = ArchiveWriter::new(Vec::new(), 1, Utc::now()).unwrap();
        writer.write_item(&id, &item).unwrap();
        let entries = read_entries(writer.finish().unwrap().as_slice()).unwrap();
        assert_eq!(entries[1].path, item_path(&id));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(read_entries(&b"definitely not zstd"[..]).is_err());
    }
}
