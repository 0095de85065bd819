/// Generates the stored name for an upload: 128 random bits as lowercase hex,
/// followed by the original extension (with its dot) when there is one.
pub fn assign_identity(original_name: &str) -> String {
    let id: [u8; 16] = rand::random();
    format!("{}{}", hex::encode(id), file_extension(original_name))
}

/// Extension of the last path component, including the leading `.`.
///
/// Leading dots do not start an extension, so `.bashrc` has none.
pub fn file_extension(name: &str) -> &str {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let stem_start = base.len() - base.trim_start_matches('.').len();
    match base[stem_start..].rfind('.') {
        Some(dot) => &base[stem_start + dot..],
        None => "",
    }
}
