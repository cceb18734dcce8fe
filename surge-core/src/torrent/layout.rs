//! Piece and block geometry derived once from torrent metadata.

use super::parsing::TorrentMetadata;
use super::{PieceIndex, TorrentError};

/// Size of one requested block. Only the final block of a piece may be shorter.
pub const BLOCK_LEN: u32 = 16_384;

/// One block of one piece: the unit of request and transfer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub piece_index: PieceIndex,
    /// Byte offset inside the piece, always a multiple of [`BLOCK_LEN`]
    pub begin: u32,
    pub length: u32,
}

impl BlockId {
    /// Position of this block within its piece.
    pub fn block_index(&self) -> usize {
        (self.begin / BLOCK_LEN) as usize
    }
}

/// Piece and block geometry of a torrent.
///
/// Every piece is `piece_length` bytes except the last, which holds whatever
/// remains of `total_length`. Every block is [`BLOCK_LEN`] bytes except the
/// last block of each piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentLayout {
    piece_length: u32,
    total_length: u64,
    piece_count: u32,
}

impl TorrentLayout {
    /// Builds the layout for a torrent of `total_length` bytes.
    ///
    /// # Errors
    /// - `TorrentError::InvalidTorrentFile` - Zero lengths or more than `u32::MAX` pieces
    pub fn new(piece_length: u32, total_length: u64) -> Result<Self, TorrentError> {
        if piece_length == 0 {
            return Err(TorrentError::InvalidTorrentFile {
                reason: "Piece length must be positive".to_string(),
            });
        }
        if total_length == 0 {
            return Err(TorrentError::InvalidTorrentFile {
                reason: "Torrent has no content".to_string(),
            });
        }

        let piece_count = u32::try_from(total_length.div_ceil(u64::from(piece_length)))
            .map_err(|_| TorrentError::InvalidTorrentFile {
                reason: "Too many pieces".to_string(),
            })?;

        Ok(Self {
            piece_length,
            total_length,
            piece_count,
        })
    }

    /// Builds the layout and checks it against the metadata's piece hashes and
    /// file table.
    ///
    /// # Errors
    /// - `TorrentError::InvalidTorrentFile` - File lengths or hash count disagree with the layout
    pub fn from_metadata(metadata: &TorrentMetadata) -> Result<Self, TorrentError> {
        let layout = Self::new(metadata.piece_length, metadata.total_length)?;

        let file_total: u64 = metadata.files.iter().map(|file| file.length).sum();
        if file_total != metadata.total_length {
            return Err(TorrentError::InvalidTorrentFile {
                reason: format!(
                    "File lengths sum to {file_total}, torrent declares {}",
                    metadata.total_length
                ),
            });
        }

        if metadata.piece_hashes.len() != layout.piece_count as usize {
            return Err(TorrentError::InvalidTorrentFile {
                reason: format!(
                    "Torrent lists {} piece hashes for {} pieces",
                    metadata.piece_hashes.len(),
                    layout.piece_count
                ),
            });
        }

        Ok(layout)
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    /// Length of the given piece, or `None` past the end of the torrent.
    pub fn piece_len(&self, index: PieceIndex) -> Option<u32> {
        if index.as_u32() >= self.piece_count {
            return None;
        }
        let start = u64::from(index.as_u32()) * u64::from(self.piece_length);
        let len = (self.total_length - start).min(u64::from(self.piece_length));
        Some(len as u32)
    }

    pub fn blocks_in_piece(&self, index: PieceIndex) -> Option<u32> {
        self.piece_len(index).map(|len| len.div_ceil(BLOCK_LEN))
    }

    /// Length of block `block_index` of the given piece.
    pub fn block_len(&self, index: PieceIndex, block_index: u32) -> Option<u32> {
        let piece_len = self.piece_len(index)?;
        let begin = block_index.checked_mul(BLOCK_LEN)?;
        if begin >= piece_len {
            return None;
        }
        Some((piece_len - begin).min(BLOCK_LEN))
    }

    /// Resolves a (piece, offset) pair from the wire into a block of this
    /// torrent. Offsets that are not block aligned resolve to nothing.
    pub fn block_at(&self, index: PieceIndex, begin: u32) -> Option<BlockId> {
        if !begin.is_multiple_of(BLOCK_LEN) {
            return None;
        }
        let length = self.block_len(index, begin / BLOCK_LEN)?;
        Some(BlockId {
            piece_index: index,
            begin,
            length,
        })
    }

    /// Every block of the piece in offset order; empty past the end.
    pub fn blocks(&self, index: PieceIndex) -> impl Iterator<Item = BlockId> + '_ {
        let count = self.blocks_in_piece(index).unwrap_or(0);
        (0..count).filter_map(move |block_index| self.block_at(index, block_index * BLOCK_LEN))
    }

    pub fn total_blocks(&self) -> usize {
        (0..self.piece_count)
            .filter_map(|index| self.blocks_in_piece(PieceIndex::new(index)))
            .map(|blocks| blocks as usize)
            .sum()
    }

    /// Absolute position of the block inside the flat download region.
    pub fn absolute_offset(&self, block: &BlockId) -> u64 {
        u64::from(block.piece_index.as_u32()) * u64::from(self.piece_length)
            + u64::from(block.begin)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::torrent::InfoHash;
    use crate::torrent::parsing::TorrentFile;

    fn metadata(piece_length: u32, files: &[u64], hashes: usize) -> TorrentMetadata {
        TorrentMetadata {
            info_hash: InfoHash::new([0u8; 20]),
            name: "layout".to_string(),
            piece_length,
            piece_hashes: vec![[0u8; 20]; hashes],
            total_length: files.iter().sum(),
            files: files
                .iter()
                .enumerate()
                .map(|(i, &length)| TorrentFile {
                    path: vec!["layout".to_string(), format!("file{i}")],
                    length,
                })
                .collect(),
            announce_urls: Vec::new(),
        }
    }

    #[test]
    fn test_single_piece_two_blocks() {
        let layout = TorrentLayout::new(32_768, 32_768).unwrap();
        assert_eq!(layout.piece_count(), 1);
        assert_eq!(layout.blocks_in_piece(PieceIndex::new(0)), Some(2));
        assert_eq!(layout.total_blocks(), 2);

        let blocks: Vec<_> = layout.blocks(PieceIndex::new(0)).collect();
        assert_eq!(blocks[0].begin, 0);
        assert_eq!(blocks[1].begin, BLOCK_LEN);
        assert!(blocks.iter().all(|b| b.length == BLOCK_LEN));
    }

    #[test]
    fn test_short_last_piece_and_block() {
        // 2 full pieces of 40000 plus 5000 bytes
        let layout = TorrentLayout::new(40_000, 85_000).unwrap();
        assert_eq!(layout.piece_count(), 3);
        assert_eq!(layout.piece_len(PieceIndex::new(0)), Some(40_000));
        assert_eq!(layout.piece_len(PieceIndex::new(2)), Some(5_000));
        assert_eq!(layout.piece_len(PieceIndex::new(3)), None);

        // 40000 = 16384 + 16384 + 7232
        assert_eq!(layout.blocks_in_piece(PieceIndex::new(0)), Some(3));
        assert_eq!(layout.block_len(PieceIndex::new(0), 2), Some(7_232));
        assert_eq!(layout.block_len(PieceIndex::new(0), 3), None);
        assert_eq!(layout.blocks_in_piece(PieceIndex::new(2)), Some(1));
        assert_eq!(layout.block_len(PieceIndex::new(2), 0), Some(5_000));
    }

    #[test]
    fn test_last_piece_full_when_evenly_divisible() {
        let layout = TorrentLayout::new(16_384, 49_152).unwrap();
        assert_eq!(layout.piece_count(), 3);
        assert_eq!(layout.piece_len(PieceIndex::new(2)), Some(16_384));
    }

    #[test]
    fn test_block_at_rejects_misaligned_and_out_of_range() {
        let layout = TorrentLayout::new(32_768, 40_000).unwrap();
        assert!(layout.block_at(PieceIndex::new(0), 100).is_none());
        assert!(layout.block_at(PieceIndex::new(2), 0).is_none());
        assert!(layout.block_at(PieceIndex::new(1), BLOCK_LEN).is_none());

        let last = layout.block_at(PieceIndex::new(1), 0).unwrap();
        assert_eq!(last.length, 7_232);
        assert_eq!(layout.absolute_offset(&last), 32_768);
    }

    #[test]
    fn test_zero_lengths_rejected() {
        assert!(TorrentLayout::new(0, 100).is_err());
        assert!(TorrentLayout::new(16_384, 0).is_err());
    }

    #[test]
    fn test_from_metadata_validates_tables() {
        assert!(TorrentLayout::from_metadata(&metadata(16_384, &[100, 200], 1)).is_ok());

        let mut mismatched = metadata(16_384, &[100, 200], 1);
        mismatched.total_length = 400;
        assert!(TorrentLayout::from_metadata(&mismatched).is_err());

        assert!(TorrentLayout::from_metadata(&metadata(16_384, &[100, 200], 2)).is_err());
    }

    proptest! {
        #[test]
        fn prop_piece_lengths_cover_total(
            piece_length in 512u32..200_000,
            total_length in 1u64..5_000_000,
        ) {
            let layout = TorrentLayout::new(piece_length, total_length).unwrap();
            let pieces: Vec<u32> = (0..layout.piece_count())
                .map(|i| layout.piece_len(PieceIndex::new(i)).unwrap())
                .collect();

            prop_assert_eq!(pieces.iter().map(|&l| u64::from(l)).sum::<u64>(), total_length);

            let remainder = (total_length % u64::from(piece_length)) as u32;
            let expected_last = if remainder == 0 { piece_length } else { remainder };
            prop_assert_eq!(*pieces.last().unwrap(), expected_last);
        }

        #[test]
        fn prop_blocks_cover_each_piece(
            piece_length in 512u32..200_000,
            total_length in 1u64..2_000_000,
        ) {
            let layout = TorrentLayout::new(piece_length, total_length).unwrap();
            for i in 0..layout.piece_count() {
                let index = PieceIndex::new(i);
                let piece_len = layout.piece_len(index).unwrap();
                let blocks: Vec<BlockId> = layout.blocks(index).collect();

                prop_assert_eq!(blocks.len() as u32, piece_len.div_ceil(BLOCK_LEN));
                prop_assert_eq!(blocks.iter().map(|b| b.length).sum::<u32>(), piece_len);
                for (n, block) in blocks.iter().enumerate() {
                    prop_assert_eq!(block.block_index(), n);
                    if n + 1 < blocks.len() {
                        prop_assert_eq!(block.length, BLOCK_LEN);
                    }
                }
            }
        }
    }
}
