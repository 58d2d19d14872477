use crate::compress::CompressionKind;

/// magic of the environment header page
pub const HEADER_MAGIC: [u8; 4] = [b'H', b'A', b'M', 0];

/// version quadruple: major / minor / revision / file format
pub const VERSION: [u8; 4] = [0, 3, 0, 1];

pub const DEFAULT_PAGE_SIZE: u32 = 4096;
pub const MIN_PAGE_SIZE: u32 = 1024;
pub const MAX_PAGE_SIZE: u32 = 65536;

/// records of any length
pub const RECORD_SIZE_UNLIMITED: u32 = u32::MAX;

/// keys of any length
pub const KEY_SIZE_UNLIMITED: u32 = 0;

// insert flags
pub const OVERWRITE: u32 = 0x0001;
pub const DUPLICATE: u32 = 0x0002;
pub const DUPLICATE_INSERT_FIRST: u32 = 0x0004;
pub const DUPLICATE_INSERT_LAST: u32 = 0x0008;
pub const DUPLICATE_INSERT_BEFORE: u32 = 0x0010;
pub const DUPLICATE_INSERT_AFTER: u32 = 0x0020;

// find flags (approximate matching)
pub const FIND_LT_MATCH: u32 = 0x0100;
pub const FIND_GT_MATCH: u32 = 0x0200;

// database flags, persisted in the descriptor
pub(crate) const DB_FLAG_DUPLICATES: u32 = 0x0001;
pub(crate) const DB_FLAG_RECORD_NUMBER32: u32 = 0x0002;
pub(crate) const DB_FLAG_RECORD_NUMBER64: u32 = 0x0004;

/// Key and record types. The numeric value is persisted in the
/// database descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Binary = 0,
    UInt8 = 1,
    UInt16 = 2,
    UInt32 = 3,
    UInt64 = 4,
    Real32 = 5,
    Real64 = 6,
    Custom = 7,
}

impl DataType {
    pub fn from_u16(value: u16) -> Option<DataType> {
        match value {
            0 => Some(DataType::Binary),
            1 => Some(DataType::UInt8),
            2 => Some(DataType::UInt16),
            3 => Some(DataType::UInt32),
            4 => Some(DataType::UInt64),
            5 => Some(DataType::Real32),
            6 => Some(DataType::Real64),
            7 => Some(DataType::Custom),
            _ => None,
        }
    }

    /// The fixed width of the type, or `None` for variable-length types.
    pub fn fixed_size(&self) -> Option<u32> {
        match self {
            DataType::Binary | DataType::Custom => None,
            DataType::UInt8 => Some(1),
            DataType::UInt16 => Some(2),
            DataType::UInt32 => Some(4),
            DataType::UInt64 => Some(8),
            DataType::Real32 => Some(4),
            DataType::Real64 => Some(8),
        }
    }
}

/// Record-number flavor of a database. Keys are auto-assigned strictly
/// increasing fixed-width integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordNumber {
    Disabled,
    U32,
    U64,
}

#[derive(Clone, Debug)]
pub struct EnvConfig {
    pub page_size: u32,
    pub max_databases: u16,
    pub cache_capacity_bytes: usize,
    pub enable_transactions: bool,
    pub enable_fsync: bool,
    pub enable_recovery: bool,
    pub in_memory: bool,
    pub journal_compression: CompressionKind,
    pub journal_switch_threshold: u32,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_databases: 32,
            cache_capacity_bytes: 2 * 1024 * 1024,
            enable_transactions: true,
            enable_fsync: false,
            enable_recovery: true,
            in_memory: false,
            journal_compression: CompressionKind::None,
            journal_switch_threshold: 32,
        }
    }
}

impl EnvConfig {
    pub fn validate(&self) -> Result<(), crate::error::OakError> {
        let ps = self.page_size;
        if ps < MIN_PAGE_SIZE || ps > MAX_PAGE_SIZE || !ps.is_power_of_two() {
            return Err(crate::error::OakError::invalid_parameter(&format!(
                "unsupported page size {}",
                ps
            )));
        }
        if self.max_databases == 0 {
            return Err(crate::error::OakError::invalid_parameter(
                "max_databases must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct DbConfig {
    pub key_type: DataType,
    /// fixed key size in bytes, or KEY_SIZE_UNLIMITED
    pub key_size: u32,
    pub record_type: DataType,
    /// fixed record size in bytes, or RECORD_SIZE_UNLIMITED
    pub record_size: u32,
    pub enable_duplicates: bool,
    pub record_number: RecordNumber,
    pub record_compression: CompressionKind,
    /// name of a registered custom compare function (key_type Custom)
    pub compare_name: Option<String>,
    /// open a database whose custom compare function is not registered
    pub ignore_missing_callback: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            key_type: DataType::Binary,
            key_size: KEY_SIZE_UNLIMITED,
            record_type: DataType::Binary,
            record_size: RECORD_SIZE_UNLIMITED,
            enable_duplicates: false,
            record_number: RecordNumber::Disabled,
            record_compression: CompressionKind::None,
            compare_name: None,
            ignore_missing_callback: false,
        }
    }
}
