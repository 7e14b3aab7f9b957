use zerocopy::{little_endian::*, FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::static_assert;

pub const HASH_DATA_SIZE: usize = 0xF8;

/// Hash data of a HierarchicalSha256 section (PartitionFS).
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(8))]
pub struct HierarchicalSha256Data {
    pub master_hash: [u8; 0x20],
    pub block_size: U32,
    pub layer_count: U32,
    pub layer_regions: [LayerRegion; 5],
    pub _reserved: [u8; 0x80],
}

static_assert!(size_of::<HierarchicalSha256Data>() == HASH_DATA_SIZE);

impl HierarchicalSha256Data {
    /// The region holding the file system itself, after the hash table.
    #[inline]
    pub fn data_region(&self) -> &LayerRegion { &self.layer_regions[1] }
}

#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(8))]
pub struct LayerRegion {
    pub offset: U64,
    pub size: U64,
}
