//! Inline image sources (`data:image/...;base64,...`)

use std::sync::Arc;

use log::warn;

const DATA_IMAGE_PREFIX: &str = "data:image/";

/// Decode the payload of a base64 `data:image/` URI.
///
/// Returns `None` for anything else, including a data URI whose payload is not
/// valid base64; such sources are then loaded as ordinary URLs.
pub fn decode_data_uri(source: &str) -> Option<Arc<[u8]>> {
    let rest = source.trim_start().strip_prefix(DATA_IMAGE_PREFIX)?;
    let (meta, data) = rest.split_once(',')?;
    if !meta.contains(";base64") {
        return None;
    }

    let payload: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    match base64_simd::STANDARD.decode_to_vec(payload.as_bytes()) {
        Ok(bytes) => Some(bytes.into()),
        Err(e) => {
            warn!("Ignoring malformed base64 image payload ({meta}): {e}");
            None
        }
    }
}

/// MIME subtype of a data URI, e.g. `png` for `data:image/png;base64,...`
pub fn data_uri_subtype(source: &str) -> Option<&str> {
    let rest = source.trim_start().strip_prefix(DATA_IMAGE_PREFIX)?;
    let end = rest.find([';', ','])?;
    Some(&rest[..end])
}
