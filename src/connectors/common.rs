use base64::Engine;

/// Binary column values are carried through the pipeline as strings in the
/// canonical wire format "BLOB:<size_bytes>:<base64_data>". Read paths
/// encode; write paths decode back to raw bytes before binding so the
/// target stores binary data, not the wire-format string.
pub fn encode_blob(data: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(data);
    format!("BLOB:{}:{}", data.len(), b64)
}

/// Decode the canonical blob wire format back to raw bytes.
///
/// Returns `None` for plain strings that should be stored as-is.
pub fn decode_blob_wire_format(value: &str) -> Option<Vec<u8>> {
    let rest = value.strip_prefix("BLOB:")?;

    // Skip the size field
    let base64_data = rest.splitn(2, ':').nth(1)?;

    base64::engine::general_purpose::STANDARD
        .decode(base64_data)
        .ok()
}

/// Check if a query is a SELECT statement.
pub fn is_select_query(query: &str) -> bool {
    query.trim_start().to_uppercase().starts_with("SELECT")
}
