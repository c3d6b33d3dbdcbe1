#![forbid(unsafe_code)]

//! In-memory attribute model.
//!
//! An [`Attribute`] is a cheap handle: the payload (name, datatype,
//! dataspace, raw data) sits behind an `Arc` and is copied on first write,
//! while the per-object parts (creation index, shared-table location) live in
//! the handle itself.

use std::sync::Arc;

use crate::primitives::bytes::{buf::Cursor, le};
use crate::types::{AttrError, CharEncoding, Result, SharedHandle};

use super::codec;

/// Largest rank a dataspace may declare.
pub const MAX_RANK: usize = 32;

/// Maximum-dimension value meaning "unlimited".
pub const UNLIMITED: u64 = u64::MAX;

const DT_HEADER_LEN: usize = 8;
const DT_CLASS_INTEGER: u8 = 0;
const DT_CLASS_FLOAT: u8 = 1;
const DT_CLASS_STRING: u8 = 3;

/// Datatype of an attribute, kept as its encoded datatype message.
///
/// Only the common eight-byte header is interpreted (class, version and
/// element size); properties are carried through untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datatype {
    message: Vec<u8>,
    shared: Option<SharedHandle>,
}

impl Datatype {
    /// Wraps an encoded datatype message after checking its header.
    pub fn from_message(message: Vec<u8>) -> Result<Self> {
        if message.len() < DT_HEADER_LEN {
            return Err(AttrError::Corruption("datatype message shorter than its header"));
        }
        let version = message[0] >> 4;
        if !(1..=5).contains(&version) {
            return Err(AttrError::Corruption("unsupported datatype message version"));
        }
        if le::read_u32(&message[4..]).unwrap_or(0) == 0 {
            return Err(AttrError::Corruption("datatype declares zero-sized elements"));
        }
        Ok(Self {
            message,
            shared: None,
        })
    }

    fn with_header(class: u8, bits: [u8; 3], size: u32, props: &[u8]) -> Self {
        let mut message = Vec::with_capacity(DT_HEADER_LEN + props.len());
        message.push(0x10 | class);
        message.extend_from_slice(&bits);
        le::put_u32(&mut message, size);
        message.extend_from_slice(props);
        Self {
            message,
            shared: None,
        }
    }

    /// Little-endian two's-complement or unsigned integer of `size` bytes.
    pub fn integer(size: u32, signed: bool) -> Result<Self> {
        if !matches!(size, 1 | 2 | 4 | 8) {
            return Err(AttrError::Invalid("integer size must be 1, 2, 4 or 8 bytes"));
        }
        let mut props = Vec::with_capacity(4);
        props.extend_from_slice(&0u16.to_le_bytes());
        props.extend_from_slice(&((size * 8) as u16).to_le_bytes());
        let sign = if signed { 0x08 } else { 0x00 };
        Ok(Self::with_header(DT_CLASS_INTEGER, [sign, 0, 0], size, &props))
    }

    /// IEEE 754 little-endian double.
    pub fn float64() -> Self {
        let mut props = Vec::with_capacity(12);
        props.extend_from_slice(&0u16.to_le_bytes());
        props.extend_from_slice(&64u16.to_le_bytes());
        props.extend_from_slice(&[52, 11, 0, 52]);
        props.extend_from_slice(&1023u32.to_le_bytes());
        Self::with_header(DT_CLASS_FLOAT, [0x20, 63, 0], 8, &props)
    }

    /// Null-terminated fixed-length string of `len` bytes.
    pub fn fixed_string(len: u32, cset: CharEncoding) -> Result<Self> {
        if len == 0 {
            return Err(AttrError::Invalid("string length must be non-zero"));
        }
        Ok(Self::with_header(
            DT_CLASS_STRING,
            [cset.code() << 4, 0, 0],
            len,
            &[],
        ))
    }

    /// Marks this datatype as a shared message living at `handle`.
    ///
    /// The handle must already hold a reference on behalf of the attribute.
    pub fn into_shared(mut self, handle: SharedHandle) -> Self {
        self.shared = Some(handle);
        self
    }

    /// Datatype class code.
    pub fn class(&self) -> u8 {
        self.message[0] & 0x0f
    }

    /// Size in bytes of one element.
    pub fn element_size(&self) -> u32 {
        le::read_u32(&self.message[4..]).unwrap_or(0)
    }

    /// Encoded datatype message.
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Shared-table location, when the datatype is itself a shared message.
    pub fn shared(&self) -> Option<SharedHandle> {
        self.shared
    }
}

/// Shape of a dataspace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Extent {
    /// Exactly one element.
    Scalar,
    /// N-dimensional array.
    Simple {
        /// Current dimensions.
        dims: Vec<u64>,
        /// Optional maximum dimensions; [`UNLIMITED`] marks an unbounded axis.
        max: Option<Vec<u64>>,
    },
    /// No elements at all.
    Null,
}

/// Dataspace of an attribute. Attributes always select their whole extent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dataspace {
    extent: Extent,
    shared: Option<SharedHandle>,
}

const DS_VERSION_1: u8 = 1;
const DS_VERSION_2: u8 = 2;
const DS_FLAG_MAX: u8 = 0x01;
const DS_FLAG_PERM: u8 = 0x02;

impl Dataspace {
    /// Single-element dataspace.
    pub fn scalar() -> Self {
        Self {
            extent: Extent::Scalar,
            shared: None,
        }
    }

    /// Empty dataspace.
    pub fn null() -> Self {
        Self {
            extent: Extent::Null,
            shared: None,
        }
    }

    /// Fixed-size array dataspace.
    pub fn simple(dims: &[u64]) -> Result<Self> {
        Self::with_max(dims, None)
    }

    /// Array dataspace with maximum dimensions.
    pub fn with_max(dims: &[u64], max: Option<&[u64]>) -> Result<Self> {
        if dims.is_empty() || dims.len() > MAX_RANK {
            return Err(AttrError::Invalid("dataspace rank out of range"));
        }
        if let Some(max) = max {
            if max.len() != dims.len() {
                return Err(AttrError::Invalid("maximum dimensions rank mismatch"));
            }
            if dims.iter().zip(max).any(|(d, m)| *m != UNLIMITED && m < d) {
                return Err(AttrError::Invalid("dimension exceeds its maximum"));
            }
        }
        let extent = Extent::Simple {
            dims: dims.to_vec(),
            max: max.map(<[u64]>::to_vec),
        };
        Ok(Self {
            extent,
            shared: None,
        })
    }

    /// Marks this dataspace as a shared message living at `handle`.
    pub fn into_shared(mut self, handle: SharedHandle) -> Self {
        self.shared = Some(handle);
        self
    }

    /// The extent.
    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    /// Shared-table location, when the dataspace is itself a shared message.
    pub fn shared(&self) -> Option<SharedHandle> {
        self.shared
    }

    /// Number of elements in the extent.
    pub fn element_count(&self) -> Result<u64> {
        match &self.extent {
            Extent::Scalar => Ok(1),
            Extent::Null => Ok(0),
            Extent::Simple { dims, .. } => dims.iter().try_fold(1u64, |acc, d| {
                acc.checked_mul(*d)
                    .ok_or(AttrError::Invalid("dataspace element count overflows"))
            }),
        }
    }

    /// Encodes the extent as a version 2 dataspace message.
    pub fn encode_message(&self) -> Vec<u8> {
        let (kind, dims, max): (u8, &[u64], Option<&Vec<u64>>) = match &self.extent {
            Extent::Scalar => (0, &[][..], None),
            Extent::Simple { dims, max } => (1, dims.as_slice(), max.as_ref()),
            Extent::Null => (2, &[][..], None),
        };
        let mut out = Vec::with_capacity(4 + 16 * dims.len());
        out.push(DS_VERSION_2);
        out.push(dims.len() as u8);
        out.push(if max.is_some() { DS_FLAG_MAX } else { 0 });
        out.push(kind);
        for d in dims {
            le::put_u64(&mut out, *d);
        }
        for m in max.into_iter().flatten() {
            le::put_u64(&mut out, *m);
        }
        out
    }

    /// Decodes a version 1 or 2 dataspace message.
    pub fn decode_message(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes, "dataspace message truncated");
        let version = cur.u8()?;
        let rank = cur.u8()? as usize;
        let flags = cur.u8()?;
        if rank > MAX_RANK {
            return Err(AttrError::Corruption("dataspace rank out of range"));
        }
        let kind = match version {
            DS_VERSION_1 => {
                cur.skip(5)?;
                if flags & DS_FLAG_PERM != 0 {
                    return Err(AttrError::Corruption("dataspace permutations are unsupported"));
                }
                if rank == 0 {
                    0
                } else {
                    1
                }
            }
            DS_VERSION_2 => cur.u8()?,
            _ => return Err(AttrError::Corruption("unsupported dataspace message version")),
        };
        let mut dims = Vec::with_capacity(rank);
        for _ in 0..rank {
            dims.push(cur.u64_le()?);
        }
        let max = if flags & DS_FLAG_MAX != 0 {
            let mut max = Vec::with_capacity(rank);
            for _ in 0..rank {
                max.push(cur.u64_le()?);
            }
            Some(max)
        } else {
            None
        };
        match (kind, rank) {
            (0, 0) => Ok(Self::scalar()),
            (2, 0) => Ok(Self::null()),
            (1, r) if r > 0 => Self::with_max(&dims, max.as_deref())
                .map_err(|_| AttrError::Corruption("dataspace dimensions exceed maximum")),
            _ => Err(AttrError::Corruption("dataspace type does not match its rank")),
        }
    }
}

/// Shareable part of an attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct AttrPayload {
    name: String,
    datatype: Datatype,
    dataspace: Dataspace,
    data: Vec<u8>,
    encoding: CharEncoding,
    version: u8,
}

/// Summary returned by attribute info queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttrInfo {
    /// Character set of the name.
    pub encoding: CharEncoding,
    /// Size of the raw data in bytes.
    pub data_size: u64,
    /// Creation index, when the object tracks creation order.
    pub creation_order: Option<u32>,
}

/// One named, typed value attached to an object.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    payload: Arc<AttrPayload>,
    creation_index: Option<u32>,
    sh_loc: Option<SharedHandle>,
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AttrError::Invalid("attribute name is empty"));
    }
    if name.as_bytes().contains(&0) {
        return Err(AttrError::Invalid("attribute name contains NUL"));
    }
    if name.len() + 1 > u16::MAX as usize {
        return Err(AttrError::Invalid("attribute name too long"));
    }
    Ok(())
}

fn data_size(datatype: &Datatype, dataspace: &Dataspace) -> Result<u64> {
    dataspace
        .element_count()?
        .checked_mul(datatype.element_size() as u64)
        .ok_or(AttrError::Invalid("attribute data size overflows"))
}

impl Attribute {
    /// Builds an attribute; `data` must hold exactly one value per element.
    ///
    /// Names that are pure ASCII are tagged ASCII, anything else UTF-8.
    pub fn new(
        name: impl Into<String>,
        datatype: Datatype,
        dataspace: Dataspace,
        data: Vec<u8>,
    ) -> Result<Self> {
        let name = name.into();
        check_name(&name)?;
        if data_size(&datatype, &dataspace)? != data.len() as u64 {
            return Err(AttrError::Invalid(
                "data size does not match datatype and dataspace",
            ));
        }
        let encoding = if name.is_ascii() {
            CharEncoding::Ascii
        } else {
            CharEncoding::Utf8
        };
        let mut payload = AttrPayload {
            name,
            datatype,
            dataspace,
            data,
            encoding,
            version: codec::ATTR_VERSION_1,
        };
        payload.version = codec::minimal_version(&payload);
        Ok(Self::from_payload(payload))
    }

    pub(crate) fn from_payload(payload: AttrPayload) -> Self {
        Self {
            payload: Arc::new(payload),
            creation_index: None,
            sh_loc: None,
        }
    }

    pub(crate) fn assemble(
        name: String,
        datatype: Datatype,
        dataspace: Dataspace,
        data: Vec<u8>,
        encoding: CharEncoding,
        version: u8,
    ) -> Self {
        Self::from_payload(AttrPayload {
            name,
            datatype,
            dataspace,
            data,
            encoding,
            version,
        })
    }

    /// Overrides the name encoding. UTF-8 forces at least version 3.
    pub fn with_encoding(mut self, encoding: CharEncoding) -> Self {
        let payload = Arc::make_mut(&mut self.payload);
        payload.encoding = encoding;
        payload.version = payload.version.max(codec::minimal_version(payload));
        self.sh_loc = None;
        self
    }

    /// Sets the creation index this attribute will be stored under.
    pub fn with_creation_index(mut self, index: u32) -> Self {
        self.creation_index = Some(index);
        self
    }

    /// Attribute name.
    pub fn name(&self) -> &str {
        &self.payload.name
    }

    /// Datatype.
    pub fn datatype(&self) -> &Datatype {
        &self.payload.datatype
    }

    /// Dataspace.
    pub fn dataspace(&self) -> &Dataspace {
        &self.payload.dataspace
    }

    /// Raw data.
    pub fn data(&self) -> &[u8] {
        &self.payload.data
    }

    /// Character set of the name.
    pub fn encoding(&self) -> CharEncoding {
        self.payload.encoding
    }

    /// Attribute message version the payload encodes with.
    pub fn version(&self) -> u8 {
        self.payload.version
    }

    /// Creation index, if assigned.
    pub fn creation_index(&self) -> Option<u32> {
        self.creation_index
    }

    /// Location in the shared-message table, if the whole attribute is shared.
    pub fn shared_handle(&self) -> Option<SharedHandle> {
        self.sh_loc
    }

    /// Shared datatype/dataspace components, in that order.
    pub fn shared_components(&self) -> impl Iterator<Item = SharedHandle> + '_ {
        self.datatype()
            .shared()
            .into_iter()
            .chain(self.dataspace().shared())
    }

    /// Whether two handles point at the same in-memory payload.
    pub fn shares_payload_with(&self, other: &Attribute) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }

    /// Name encoding, data size and creation order.
    pub fn info(&self) -> Result<AttrInfo> {
        Ok(AttrInfo {
            encoding: self.encoding(),
            data_size: data_size(self.datatype(), self.dataspace())?,
            creation_order: self.creation_index,
        })
    }

    /// Replaces the raw data; the size must stay the same.
    ///
    /// The attribute no longer matches any shared message it was read from.
    pub fn set_data(&mut self, data: Vec<u8>) -> Result<()> {
        if data.len() != self.payload.data.len() {
            return Err(AttrError::Invalid(
                "data size does not match datatype and dataspace",
            ));
        }
        Arc::make_mut(&mut self.payload).data = data;
        self.sh_loc = None;
        Ok(())
    }

    pub(crate) fn payload(&self) -> &AttrPayload {
        &self.payload
    }

    pub(crate) fn set_name(&mut self, name: &str) -> Result<()> {
        check_name(name)?;
        let payload = Arc::make_mut(&mut self.payload);
        payload.name = name.to_owned();
        if !name.is_ascii() {
            payload.encoding = CharEncoding::Utf8;
        }
        self.sh_loc = None;
        Ok(())
    }

    pub(crate) fn set_version(&mut self, version: u8) {
        if self.payload.version != version {
            Arc::make_mut(&mut self.payload).version = version;
            self.sh_loc = None;
        }
    }

    pub(crate) fn set_creation_index(&mut self, index: Option<u32>) {
        self.creation_index = index;
    }

    pub(crate) fn set_shared_handle(&mut self, handle: Option<SharedHandle>) {
        self.sh_loc = handle;
    }
}

impl AttrPayload {
    /// Attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Datatype.
    pub fn datatype(&self) -> &Datatype {
        &self.datatype
    }

    /// Dataspace.
    pub fn dataspace(&self) -> &Dataspace {
        &self.dataspace
    }

    /// Raw data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Character set of the name.
    pub fn encoding(&self) -> CharEncoding {
        self.encoding
    }

    /// Message version.
    pub fn version(&self) -> u8 {
        self.version
    }
}
