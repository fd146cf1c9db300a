use crate::core::error::PipelineError;

/// Splits `items` into consecutive runs of `chunk_size`, keeping order. Only
/// the last run may be shorter, and it is never empty.
pub fn partition<T: Clone>(items: &[T], chunk_size: usize) -> Result<Vec<Vec<T>>, PipelineError> {
    if chunk_size == 0 {
        return Err(PipelineError::Validation(
            "chunk size must be at least 1".to_string(),
        ));
    }
    Ok(items.chunks(chunk_size).map(<[T]>::to_vec).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remainder_goes_last() {
        let items: Vec<u32> = (0..12).collect();
        let chunks = partition(&items, 5).unwrap();
        assert_eq!(
            chunks,
            vec![
                vec![0, 1, 2, 3, 4],
                vec![5, 6, 7, 8, 9],
                vec![10, 11],
            ]
        );
    }

    #[test]
    fn test_exact_multiple_has_no_short_chunk() {
        let items: Vec<u32> = (0..10).collect();
        let chunks = partition(&items, 5).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 5));
    }

    #[test]
    fn test_short_input_is_one_chunk() {
        let items = vec!["a", "b"];
        assert_eq!(partition(&items, 5).unwrap(), vec![items.clone()]);
    }

    #[test]
    fn test_empty_input_gives_no_chunks() {
        let items: Vec<u8> = Vec::new();
        assert!(partition(&items, 5).unwrap().is_empty());
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        assert!(matches!(
            partition(&[1, 2, 3], 0),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn test_concatenation_reconstructs_input() {
        for len in 1..=23usize {
            let items: Vec<usize> = (0..len).collect();
            for size in 1..=7 {
                let chunks = partition(&items, size).unwrap();
                let (last, body) = chunks.split_last().unwrap();
                assert!(body.iter().all(|c| c.len() == size));
                assert!((1..=size).contains(&last.len()));
                assert_eq!(chunks.concat(), items);
            }
        }
    }
}
