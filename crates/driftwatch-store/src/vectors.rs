//! Embedding columns are stored as little-endian `f32` blobs.

use crate::error::StoreError;

pub fn f32_slice_to_blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn blob_to_f32_vec(
    blob: &[u8],
    table: &'static str,
    column: &'static str,
) -> Result<Vec<f32>, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::CorruptRow {
            table,
            column,
            detail: format!("blob length {} is not a multiple of 4", blob.len()),
        });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Read a nullable embedding column.
pub fn get_embedding(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<Vec<f32>>, StoreError> {
    crate::row_helpers::get_opt::<Vec<u8>>(row, idx, table, column)?
        .map(|blob| blob_to_f32_vec(&blob, table, column))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_layout_is_little_endian() {
        let blob = f32_slice_to_blob(&[1.0, -0.5]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[..4], &1.0f32.to_le_bytes());
        assert_eq!(blob_to_f32_vec(&blob, "t", "c").unwrap(), vec![1.0, -0.5]);
    }

    #[test]
    fn truncated_blob_rejected() {
        let err = blob_to_f32_vec(&[0, 0, 128], "snapshots", "embedding").unwrap_err();
        assert!(matches!(err, StoreError::CorruptRow { table: "snapshots", .. }));
    }

    #[test]
    fn empty_blob_is_empty_vector() {
        assert!(blob_to_f32_vec(&[], "t", "c").unwrap().is_empty());
    }
}
