//! Publish metadata for one part

use super::traits::Metadata;
use crate::error::{DownloadError, Result};
use crate::source::detail::ItemDetail;
use crate::utils::sanitize_metadata;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

/// Provisional value of the `upload-state` field while files are transferred
pub const UPLOAD_STATE_UPLOADING: &str = "uploading";
/// Final value of the `upload-state` field
pub const UPLOAD_STATE_UPLOADED: &str = "uploaded";

/// Per-part inputs of the metadata builder that do not come from the snapshot
#[derive(Debug, Clone)]
pub struct PublishContext<'a> {
    /// Remote identifier of the part
    pub remote_identifier: &'a str,
    /// Part index
    pub part_index: u32,
    /// Target collection
    pub collection: &'a str,
    /// Item page URL, without the part query
    pub item_url: &'a str,
    /// Prefix of the subject list
    pub item_tag: &'a str,
    /// URN namespace of the platform
    pub urn_namespace: &'a str,
    /// Scanner string, see [`scanner_string`]
    pub scanner: &'a str,
}

/// `<name> v<version>` of this tool
pub fn scanner_string(name: &str) -> String {
    format!("{} v{}", name, env!("CARGO_PKG_VERSION"))
}

/// Build the submission metadata of one part from the item-detail snapshot
///
/// String fields are already stripped of XML-illegal characters.
pub fn build_metadata(detail: &ItemDetail, ctx: &PublishContext<'_>) -> Result<Metadata> {
    let view = &detail.view;
    let page = detail
        .page(ctx.part_index)
        .ok_or_else(|| DownloadError::InvalidDetail {
            id: view.bvid.clone(),
            reason: format!("no page entry for part {}", ctx.part_index),
        })?;

    let published = DateTime::<Utc>::from_timestamp(view.pubdate, 0).ok_or_else(|| {
        DownloadError::InvalidDetail {
            id: view.bvid.clone(),
            reason: format!("pubdate {} out of range", view.pubdate),
        }
    })?;

    let subject = [ctx.item_tag, "video"]
        .into_iter()
        .chain(detail.tags.iter().map(|t| t.tag_name.as_str()))
        .collect::<Vec<_>>()
        .join("; ");

    let mut metadata = Metadata::new();
    metadata.insert("mediatype".into(), json!("movies"));
    metadata.insert("collection".into(), json!(ctx.collection));
    metadata.insert(
        "title".into(),
        json!(format!("{} P{} {}", view.title, ctx.part_index, page.part)),
    );
    metadata.insert(
        "description".into(),
        json!(format!("{} uploading...", ctx.remote_identifier)),
    );
    metadata.insert("creator".into(), creator(detail));
    metadata.insert("date".into(), json!(published.format("%Y-%m-%d").to_string()));
    metadata.insert("year".into(), json!(published.format("%Y").to_string()));
    metadata.insert("aid".into(), json!(view.aid));
    metadata.insert("bvid".into(), json!(view.bvid));
    metadata.insert("cid".into(), json!(page.cid));
    metadata.insert("mid".into(), json!(view.owner.mid));
    metadata.insert(
        "external-identifier".into(),
        external_identifiers(detail, page.cid, ctx.urn_namespace),
    );
    metadata.insert("subject".into(), json!(subject));
    metadata.insert("upload-state".into(), json!(UPLOAD_STATE_UPLOADING));
    metadata.insert(
        "originalurl".into(),
        json!(format!("{}?p={}", ctx.item_url, ctx.part_index)),
    );
    metadata.insert("scanner".into(), json!(ctx.scanner));

    sanitize_metadata(&mut metadata);
    Ok(metadata)
}

/// Single creator as a string, several as a list
fn creator(detail: &ItemDetail) -> Value {
    let names: Vec<&str> = detail
        .contributors()
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    match names.as_slice() {
        [single] => json!(single),
        _ => json!(names),
    }
}

fn external_identifiers(detail: &ItemDetail, cid: u64, ns: &str) -> Value {
    let view = &detail.view;
    let mut urns = vec![
        format!("urn:{ns}:video:aid:{}", view.aid),
        format!("urn:{ns}:video:bvid:{}", view.bvid),
        format!("urn:{ns}:video:cid:{cid}"),
    ];
    urns.extend(
        detail
            .contributors()
            .iter()
            .map(|p| format!("urn:{ns}:user:mid:{}", p.mid)),
    );
    json!(urns)
}

/// Fields whose remote value differs from the final value
///
/// Compares `upload-state`, `creator`, `description`, `scanner` and
/// `external-identifier`. The returned patch is sanitized and empty when the
/// remote item is already up to date.
pub fn reconcile_patch(remote: &Metadata, fresh: &Metadata, detail: &ItemDetail) -> Metadata {
    let mut wanted = Metadata::new();
    wanted.insert("upload-state".into(), json!(UPLOAD_STATE_UPLOADED));
    wanted.insert("description".into(), json!(detail.view.desc));
    for key in ["creator", "scanner", "external-identifier"] {
        if let Some(value) = fresh.get(key) {
            wanted.insert(key.into(), value.clone());
        }
    }
    sanitize_metadata(&mut wanted);

    wanted
        .into_iter()
        .filter(|(key, value)| !same_value(remote.get(key), value))
        .collect()
}

/// Remote stores return numbers as strings and single-element lists as scalars
fn same_value(remote: Option<&Value>, wanted: &Value) -> bool {
    let Some(remote) = remote else {
        return false;
    };
    if remote == wanted {
        return true;
    }
    match (remote, wanted) {
        (Value::String(r), Value::Array(w)) | (Value::Array(w), Value::String(r)) => {
            w.len() == 1 && w[0].as_str() == Some(r.as_str())
        }
        (Value::String(r), Value::Number(n)) | (Value::Number(n), Value::String(r)) => {
            *r == n.to_string()
        }
        _ => false,
    }
}
