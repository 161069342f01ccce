//! Image id normalization

/// Strip the retrieval-scheme prefix (everything up to the first `:`)
///
/// `wadouri:http://host/a.dcm` and `dicomfile:http://host/a.dcm` both
/// normalize to `http://host/a.dcm`. Ids without a scheme come back unchanged.
pub fn image_id_to_uri(image_id: &str) -> &str {
    match image_id.find(':') {
        Some(idx) => &image_id[idx + 1..],
        None => image_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_scheme() {
        assert_eq!(image_id_to_uri("wadouri:http://host/a.dcm"), "http://host/a.dcm");
        assert_eq!(image_id_to_uri("nifti:volume.nii"), "volume.nii");
    }

    #[test]
    fn test_without_scheme() {
        assert_eq!(image_id_to_uri("plain-id"), "plain-id");
        assert_eq!(image_id_to_uri(""), "");
    }
}
