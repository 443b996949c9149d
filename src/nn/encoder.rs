use super::{NnErr, Result};

/// Shape contract of a multi-scale feature encoder.
///
/// Stage `i` of the encoder yields `out_channels()[i]` channels at
/// `out_strides()[i]` times smaller resolution than the input.
pub trait EncoderSpec {
    fn out_channels(&self) -> &[usize];

    fn out_strides(&self) -> &[usize];

    /// Channels and strides of the given stages, in the order asked for.
    fn stages(&self, indexes: &[usize]) -> Result<Vec<(usize, usize)>> {
        let channels = take(self.out_channels(), indexes)?;
        let strides = take(self.out_strides(), indexes)?;
        Ok(channels.into_iter().zip(strides).collect())
    }
}

/// Picks `elements[i]` for every `i` in `indexes`.
///
/// # Returns
/// The picked elements or an error if an index is out of range.
pub fn take<T: Clone>(elements: &[T], indexes: &[usize]) -> Result<Vec<T>> {
    indexes
        .iter()
        .map(|&index| {
            elements.get(index).cloned().ok_or(NnErr::IndexOutOfRange {
                index,
                len: elements.len(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pyramid;

    impl EncoderSpec for Pyramid {
        fn out_channels(&self) -> &[usize] {
            &[64, 128, 256, 512]
        }

        fn out_strides(&self) -> &[usize] {
            &[4, 8, 16, 32]
        }
    }

    #[test]
    fn take_keeps_index_order() {
        assert_eq!(take(&['a', 'b', 'c'], &[2, 0, 2]).unwrap(), vec!['c', 'a', 'c']);
        assert!(take::<u8>(&[], &[]).unwrap().is_empty());
    }

    #[test]
    fn take_out_of_range() {
        assert!(matches!(
            take(&[1, 2], &[0, 2]),
            Err(NnErr::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn encoder_stages() {
        let stages = Pyramid.stages(&[1, 3]).unwrap();
        assert_eq!(stages, vec![(128, 8), (512, 32)]);
        assert!(Pyramid.stages(&[4]).is_err());
    }
}
