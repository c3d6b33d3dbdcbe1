#![forbid(unsafe_code)]

//! Attribute message wire format.
//!
//! ```text
//! version:u8 | flags:u8 | name_len:u16 | dt_size:u16 | ds_size:u16
//! | [encoding:u8, version >= 3]
//! | name NUL-terminated | datatype message | dataspace message | raw data
//! ```
//!
//! Version 1 zero-pads the name and both messages to eight bytes and keeps
//! the flags byte reserved. A set flag bit replaces the matching message with
//! a shared-message reference.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::primitives::bytes::{align, buf::Cursor, le};
use crate::primitives::shared::SharedMessages;
use crate::types::{AttrError, CharEncoding, HeapId, Result, SharedHandle, HEAP_ID_LEN};

use super::attr::{AttrPayload, Attribute, Datatype, Dataspace};

/// Oldest layout: padded fields, no flags, ASCII only.
pub const ATTR_VERSION_1: u8 = 1;
/// Unpadded fields with shared-component flags.
pub const ATTR_VERSION_2: u8 = 2;
/// Adds the name character set.
pub const ATTR_VERSION_3: u8 = 3;
/// Newest version this codec writes.
pub const ATTR_VERSION_LATEST: u8 = ATTR_VERSION_3;

/// Datatype message is a shared-message reference.
pub const FLAG_DATATYPE_SHARED: u8 = 0x01;
/// Dataspace message is a shared-message reference.
pub const FLAG_DATASPACE_SHARED: u8 = 0x02;
const FLAG_ALL: u8 = FLAG_DATATYPE_SHARED | FLAG_DATASPACE_SHARED;

const SHARED_REF_VERSION: u8 = 3;
const SHARED_REF_IN_TABLE: u8 = 1;
const SHARED_REF_LEN: usize = 2 + HEAP_ID_LEN;

/// Lowest and highest attribute message versions a file may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionBounds {
    /// Every message is written with at least this version.
    pub low: u8,
    /// Messages needing a newer version are rejected.
    pub high: u8,
}

impl Default for VersionBounds {
    fn default() -> Self {
        Self {
            low: ATTR_VERSION_1,
            high: ATTR_VERSION_LATEST,
        }
    }
}

impl VersionBounds {
    /// Only the newest layout.
    pub fn latest() -> Self {
        Self {
            low: ATTR_VERSION_LATEST,
            high: ATTR_VERSION_LATEST,
        }
    }

    /// Rejects bounds outside the known versions or in the wrong order.
    pub fn validate(&self) -> Result<()> {
        let known = ATTR_VERSION_1..=ATTR_VERSION_LATEST;
        if !known.contains(&self.low) || !known.contains(&self.high) || self.low > self.high {
            return Err(AttrError::Invalid("attribute version bounds out of order"));
        }
        Ok(())
    }
}

/// Smallest version able to represent `payload`.
pub fn minimal_version(payload: &AttrPayload) -> u8 {
    if payload.encoding() != CharEncoding::Ascii {
        ATTR_VERSION_3
    } else if payload.datatype().shared().is_some() || payload.dataspace().shared().is_some() {
        ATTR_VERSION_2
    } else {
        ATTR_VERSION_1
    }
}

/// Picks the version `attr` encodes with under `bounds` and stores it.
pub fn set_version(attr: &mut Attribute, bounds: VersionBounds) -> Result<()> {
    let version = minimal_version(attr.payload()).max(bounds.low);
    if version > bounds.high {
        return Err(AttrError::BadRange(
            "attribute needs a newer message version than the file allows",
        ));
    }
    attr.set_version(version);
    Ok(())
}

fn shared_ref(handle: SharedHandle) -> [u8; SHARED_REF_LEN] {
    let mut out = [0u8; SHARED_REF_LEN];
    out[0] = SHARED_REF_VERSION;
    out[1] = SHARED_REF_IN_TABLE;
    out[2..].copy_from_slice(handle.0.as_bytes());
    out
}

fn parse_shared_ref(bytes: &[u8]) -> Result<SharedHandle> {
    let mut cur = Cursor::new(bytes, "shared component reference truncated");
    if cur.u8()? != SHARED_REF_VERSION {
        return Err(AttrError::Corruption("unsupported shared reference version"));
    }
    if cur.u8()? != SHARED_REF_IN_TABLE {
        return Err(AttrError::Corruption("shared component outside the message table"));
    }
    Ok(SharedHandle(HeapId::from_slice(cur.take(HEAP_ID_LEN)?)?))
}

fn u16_len(len: usize, what: &'static str) -> Result<u16> {
    u16::try_from(len).map_err(|_| AttrError::Invalid(what))
}

/// Serialises `attr` with the given message version.
pub fn encode(attr: &Attribute, version: u8) -> Result<Vec<u8>> {
    if !(ATTR_VERSION_1..=ATTR_VERSION_LATEST).contains(&version) {
        return Err(AttrError::BadRange("unknown attribute message version"));
    }
    let payload = attr.payload();
    let dt_shared = payload.datatype().shared();
    let ds_shared = payload.dataspace().shared();
    if version < ATTR_VERSION_2 && (dt_shared.is_some() || ds_shared.is_some()) {
        return Err(AttrError::Invalid(
            "version 1 messages cannot reference shared components",
        ));
    }
    if version < ATTR_VERSION_3 && payload.encoding() != CharEncoding::Ascii {
        return Err(AttrError::Invalid(
            "non-ASCII names need attribute message version 3",
        ));
    }

    let dt_ref;
    let dt_bytes: &[u8] = match dt_shared {
        Some(h) => {
            dt_ref = shared_ref(h);
            &dt_ref[..]
        }
        None => payload.datatype().message(),
    };
    let ds_bytes = match ds_shared {
        Some(h) => shared_ref(h).to_vec(),
        None => payload.dataspace().encode_message(),
    };
    let name = payload.name().as_bytes();
    let name_len = u16_len(name.len() + 1, "attribute name too long")?;
    let dt_len = u16_len(dt_bytes.len(), "datatype message too large")?;
    let ds_len = u16_len(ds_bytes.len(), "dataspace message too large")?;

    let mut flags = 0u8;
    if dt_shared.is_some() {
        flags |= FLAG_DATATYPE_SHARED;
    }
    if ds_shared.is_some() {
        flags |= FLAG_DATASPACE_SHARED;
    }

    let padded = version == ATTR_VERSION_1;
    let mut out = Vec::with_capacity(
        16 + align::pad8(name.len() + 1)
            + align::pad8(dt_bytes.len())
            + align::pad8(ds_bytes.len())
            + payload.data().len(),
    );
    out.push(version);
    out.push(if version >= ATTR_VERSION_2 { flags } else { 0 });
    le::put_u16(&mut out, name_len);
    le::put_u16(&mut out, dt_len);
    le::put_u16(&mut out, ds_len);
    if version >= ATTR_VERSION_3 {
        out.push(payload.encoding().code());
    }
    let mut put = |bytes: &[u8], nul: bool| {
        let start = out.len();
        out.extend_from_slice(bytes);
        if nul {
            out.push(0);
        }
        if padded {
            align::zero_pad8(&mut out, start);
        }
    };
    put(name, true);
    put(dt_bytes, false);
    put(&ds_bytes, false);
    out.extend_from_slice(payload.data());
    Ok(out)
}

/// Datatype or dataspace as found in an encoded attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Component {
    /// Message bytes stored inline.
    Inline(Vec<u8>),
    /// Reference into the shared-message table.
    Shared(SharedHandle),
}

impl Component {
    fn handle(&self) -> Option<SharedHandle> {
        match self {
            Component::Shared(h) => Some(*h),
            Component::Inline(_) => None,
        }
    }

    fn load(self, shared: Option<&dyn SharedMessages>) -> Result<(Vec<u8>, Option<SharedHandle>)> {
        match self {
            Component::Inline(bytes) => Ok((bytes, None)),
            Component::Shared(h) => {
                let table = shared.ok_or(AttrError::ShareError(
                    "shared component without a message table",
                ))?;
                Ok((table.read(h)?, Some(h)))
            }
        }
    }
}

/// Decoded attribute whose shared components are not yet resolved.
///
/// Fully owned, so it can leave a pinned heap callback before any
/// shared-table lookups happen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawAttribute {
    /// Message version.
    pub version: u8,
    /// Attribute name.
    pub name: String,
    /// Name character set.
    pub encoding: CharEncoding,
    /// Datatype message or reference.
    pub datatype: Component,
    /// Dataspace message or reference.
    pub dataspace: Component,
    /// Everything after the dataspace; trimmed to the data size on resolve.
    pub data: Vec<u8>,
}

impl RawAttribute {
    /// Shared component handles, datatype first.
    pub fn shared_components(&self) -> SmallVec<[SharedHandle; 2]> {
        self.datatype
            .handle()
            .into_iter()
            .chain(self.dataspace.handle())
            .collect()
    }

    /// Loads shared components and checks the data length.
    pub fn resolve(self, shared: Option<&dyn SharedMessages>) -> Result<Attribute> {
        let (dt_bytes, dt_handle) = self.datatype.load(shared)?;
        let (ds_bytes, ds_handle) = self.dataspace.load(shared)?;
        let mut datatype = Datatype::from_message(dt_bytes)?;
        if let Some(h) = dt_handle {
            datatype = datatype.into_shared(h);
        }
        let mut dataspace = Dataspace::decode_message(&ds_bytes)?;
        if let Some(h) = ds_handle {
            dataspace = dataspace.into_shared(h);
        }
        let expected = dataspace
            .element_count()
            .ok()
            .and_then(|n| n.checked_mul(datatype.element_size() as u64))
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(AttrError::Corruption("attribute data size overflows"))?;
        let mut data = self.data;
        if data.len() < expected {
            return Err(AttrError::Corruption("attribute data truncated"));
        }
        data.truncate(expected);
        Ok(Attribute::assemble(
            self.name,
            datatype,
            dataspace,
            data,
            self.encoding,
            self.version,
        ))
    }
}

fn take_field<'a>(cur: &mut Cursor<'a>, len: usize, padded: bool) -> Result<&'a [u8]> {
    let raw = cur.take(len)?;
    if padded {
        cur.skip(align::pad8(len) - len)?;
    }
    Ok(raw)
}

/// Parses an encoded attribute without touching the shared-message table.
pub fn decode_raw(bytes: &[u8]) -> Result<RawAttribute> {
    let mut cur = Cursor::new(bytes, "attribute message truncated");
    let version = cur.u8()?;
    if !(ATTR_VERSION_1..=ATTR_VERSION_LATEST).contains(&version) {
        return Err(AttrError::Corruption("unsupported attribute message version"));
    }
    let flags = cur.u8()?;
    let flags = if version >= ATTR_VERSION_2 {
        if flags & !FLAG_ALL != 0 {
            return Err(AttrError::Corruption("unknown attribute message flag"));
        }
        flags
    } else {
        0
    };
    let name_len = cur.u16_le()? as usize;
    let dt_len = cur.u16_le()? as usize;
    let ds_len = cur.u16_le()? as usize;
    let encoding = if version >= ATTR_VERSION_3 {
        CharEncoding::from_code(cur.u8()?)?
    } else {
        CharEncoding::Ascii
    };

    let padded = version == ATTR_VERSION_1;
    let name_raw = take_field(&mut cur, name_len, padded)?;
    let dt_raw = take_field(&mut cur, dt_len, padded)?;
    let ds_raw = take_field(&mut cur, ds_len, padded)?;

    let name = match name_raw.split_last() {
        Some((&0, body)) if !body.is_empty() && !body.contains(&0) => std::str::from_utf8(body)
            .map_err(|_| AttrError::Corruption("attribute name is not valid UTF-8"))?
            .to_owned(),
        _ => return Err(AttrError::Corruption("attribute name not NUL-terminated")),
    };
    let datatype = if flags & FLAG_DATATYPE_SHARED != 0 {
        Component::Shared(parse_shared_ref(dt_raw)?)
    } else {
        Component::Inline(dt_raw.to_vec())
    };
    let dataspace = if flags & FLAG_DATASPACE_SHARED != 0 {
        Component::Shared(parse_shared_ref(ds_raw)?)
    } else {
        Component::Inline(ds_raw.to_vec())
    };
    Ok(RawAttribute {
        version,
        name,
        encoding,
        datatype,
        dataspace,
        data: cur.rest().to_vec(),
    })
}

/// Parses an encoded attribute and resolves its shared components.
pub fn decode(bytes: &[u8], shared: Option<&dyn SharedMessages>) -> Result<Attribute> {
    decode_raw(bytes)?.resolve(shared)
}
