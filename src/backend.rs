//! Boundary contract with the in-process rendering backend.
//!
//! The session core forwards every request to a [`Backend`]; the trait
//! mirrors the native rendering API surface the bridge relays. Backends are
//! invoked only from the inbound context and may block (rendering and frame
//! maps are synchronous by contract).
//!
//! Array mapping contract: an array stays mapped after [`Backend::map_array`]
//! until the peer sends its unmap request; the unmap path is
//! unmap → map → write → unmap, and array creation with an initial payload
//! is map → write → unmap.

use std::{
    env,
    fmt,
    sync::Arc,
};

use bytes::Bytes;
use thiserror::Error;

use crate::protocol::{ArrayInfo, DataType, ParameterSpec, WaitMask};

pub mod reference;

pub use reference::ReferenceBackend;

/// Opaque backend device reference. Zero is the null reference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct DeviceRef(pub u64);

impl DeviceRef {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub fn is_null(self) -> bool { self.0 == 0 }

    /// View the device as an object target, for property queries that
    /// fall back to the device itself.
    #[must_use]
    pub fn as_object(self) -> ObjectRef { ObjectRef(self.0) }
}

/// Opaque backend object reference. Zero is the null reference.
///
/// Exactly 8 bytes wide: object-typed array payload slots are rewritten
/// from client handles to these references in place.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjectRef(pub u64);

impl ObjectRef {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub fn is_null(self) -> bool { self.0 == 0 }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:#x}", self.0) }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:#x}", self.0) }
}

/// One mapped frame channel: dimensions, pixel type and pixel bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedFrame {
    pub width: u32,
    pub height: u32,
    pub element: DataType,
    pub data: Bytes,
}

/// Value returned by a property query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    StringList(Vec<String>),
    Pod(Vec<u8>),
}

/// Result of a property query: backend status code plus value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    /// Backend status: non-zero when the property was retrieved.
    pub code: i32,
    pub value: PropertyValue,
}

/// Value returned by object- and parameter-info queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InfoValue {
    Str(String),
    StringList(Vec<String>),
    Parameters(Vec<ParameterSpec>),
    Pod(Vec<u8>),
}

/// The in-process rendering backend consumed by the session core.
pub trait Backend: Send + 'static {
    /// Create a device of the given subtype; `None` when the backend
    /// cannot provide one.
    fn new_device(&mut self, subtype: &str) -> Option<DeviceRef>;

    /// Construct an object of the given type. Subtypes are `None` for
    /// types whose constructors take none. Returns the null reference for
    /// types the backend cannot construct.
    fn new_object(&mut self, device: DeviceRef, kind: DataType, subtype: Option<&str>)
        -> ObjectRef;

    /// Construct an uninitialised array of the described rank and shape.
    fn new_array(&mut self, device: DeviceRef, info: &ArrayInfo) -> ObjectRef;

    fn set_parameter(
        &mut self,
        device: DeviceRef,
        object: ObjectRef,
        name: &str,
        kind: DataType,
        value: &[u8],
    );

    fn unset_parameter(&mut self, device: DeviceRef, object: ObjectRef, name: &str);

    fn unset_all_parameters(&mut self, device: DeviceRef, object: ObjectRef);

    fn commit_parameters(&mut self, device: DeviceRef, object: ObjectRef);

    fn retain(&mut self, device: DeviceRef, object: ObjectRef);

    fn release(&mut self, device: DeviceRef, object: ObjectRef);

    /// Map an array and return its current contents. The array stays
    /// mapped until [`Backend::unmap_array`].
    fn map_array(&mut self, device: DeviceRef, array: ObjectRef) -> Bytes;

    /// Write through the active mapping of an array.
    fn write_array(&mut self, device: DeviceRef, array: ObjectRef, data: &[u8]);

    fn unmap_array(&mut self, device: DeviceRef, array: ObjectRef);

    fn render_frame(&mut self, device: DeviceRef, frame: ObjectRef);

    /// Wait on (or poll) frame completion according to the mask.
    fn frame_ready(&mut self, device: DeviceRef, frame: ObjectRef, wait: WaitMask) -> bool;

    /// Map a named frame channel; `None` when the channel is absent.
    fn map_frame(&mut self, device: DeviceRef, frame: ObjectRef, channel: &str)
        -> Option<MappedFrame>;

    fn get_property(
        &mut self,
        device: DeviceRef,
        object: ObjectRef,
        name: &str,
        kind: DataType,
        size: usize,
        wait: WaitMask,
    ) -> Property;

    fn object_subtypes(&mut self, device: DeviceRef, kind: DataType) -> Vec<String>;

    fn object_info(
        &mut self,
        device: DeviceRef,
        kind: DataType,
        subtype: &str,
        info_name: &str,
        info_kind: DataType,
    ) -> Option<InfoValue>;

    #[allow(clippy::too_many_arguments)]
    fn parameter_info(
        &mut self,
        device: DeviceRef,
        kind: DataType,
        subtype: &str,
        parameter_name: &str,
        parameter_kind: DataType,
        info_name: &str,
        info_kind: DataType,
    ) -> Option<InfoValue>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn new_device(&mut self, subtype: &str) -> Option<DeviceRef> { (**self).new_device(subtype) }

    fn new_object(
        &mut self,
        device: DeviceRef,
        kind: DataType,
        subtype: Option<&str>,
    ) -> ObjectRef {
        (**self).new_object(device, kind, subtype)
    }

    fn new_array(&mut self, device: DeviceRef, info: &ArrayInfo) -> ObjectRef {
        (**self).new_array(device, info)
    }

    fn set_parameter(
        &mut self,
        device: DeviceRef,
        object: ObjectRef,
        name: &str,
        kind: DataType,
        value: &[u8],
    ) {
        (**self).set_parameter(device, object, name, kind, value);
    }

    fn unset_parameter(&mut self, device: DeviceRef, object: ObjectRef, name: &str) {
        (**self).unset_parameter(device, object, name);
    }

    fn unset_all_parameters(&mut self, device: DeviceRef, object: ObjectRef) {
        (**self).unset_all_parameters(device, object);
    }

    fn commit_parameters(&mut self, device: DeviceRef, object: ObjectRef) {
        (**self).commit_parameters(device, object);
    }

    fn retain(&mut self, device: DeviceRef, object: ObjectRef) {
        (**self).retain(device, object);
    }

    fn release(&mut self, device: DeviceRef, object: ObjectRef) {
        (**self).release(device, object);
    }

    fn map_array(&mut self, device: DeviceRef, array: ObjectRef) -> Bytes {
        (**self).map_array(device, array)
    }

    fn write_array(&mut self, device: DeviceRef, array: ObjectRef, data: &[u8]) {
        (**self).write_array(device, array, data);
    }

    fn unmap_array(&mut self, device: DeviceRef, array: ObjectRef) {
        (**self).unmap_array(device, array);
    }

    fn render_frame(&mut self, device: DeviceRef, frame: ObjectRef) {
        (**self).render_frame(device, frame);
    }

    fn frame_ready(&mut self, device: DeviceRef, frame: ObjectRef, wait: WaitMask) -> bool {
        (**self).frame_ready(device, frame, wait)
    }

    fn map_frame(
        &mut self,
        device: DeviceRef,
        frame: ObjectRef,
        channel: &str,
    ) -> Option<MappedFrame> {
        (**self).map_frame(device, frame, channel)
    }

    fn get_property(
        &mut self,
        device: DeviceRef,
        object: ObjectRef,
        name: &str,
        kind: DataType,
        size: usize,
        wait: WaitMask,
    ) -> Property {
        (**self).get_property(device, object, name, kind, size, wait)
    }

    fn object_subtypes(&mut self, device: DeviceRef, kind: DataType) -> Vec<String> {
        (**self).object_subtypes(device, kind)
    }

    fn object_info(
        &mut self,
        device: DeviceRef,
        kind: DataType,
        subtype: &str,
        info_name: &str,
        info_kind: DataType,
    ) -> Option<InfoValue> {
        (**self).object_info(device, kind, subtype, info_name, info_kind)
    }

    fn parameter_info(
        &mut self,
        device: DeviceRef,
        kind: DataType,
        subtype: &str,
        parameter_name: &str,
        parameter_kind: DataType,
        info_name: &str,
        info_kind: DataType,
    ) -> Option<InfoValue> {
        (**self).parameter_info(
            device,
            kind,
            subtype,
            parameter_name,
            parameter_kind,
            info_name,
            info_kind,
        )
    }
}

/// Environment variable consulted when the library name is `"environment"`.
pub const BACKEND_ENV: &str = "FRAMELINK_BACKEND";

/// Creates one backend instance per session.
pub type BackendFactory = Arc<dyn Fn() -> Box<dyn Backend> + Send + Sync>;

/// A library name that does not resolve to a known backend.
#[derive(Debug, Error)]
#[error("unknown backend library: {name}")]
pub struct UnknownLibrary {
    pub name: String,
}

/// Resolve a library name to a backend factory.
///
/// `"environment"` consults [`BACKEND_ENV`] and falls back to the built-in
/// reference backend; `"reference"` and `"debug"` select it directly.
///
/// # Errors
///
/// Returns [`UnknownLibrary`] when the resolved name matches no backend.
pub fn resolve(name: &str) -> Result<BackendFactory, UnknownLibrary> {
    let resolved = if name == "environment" {
        env::var(BACKEND_ENV).unwrap_or_else(|_| "reference".to_owned())
    } else {
        name.to_owned()
    };
    match resolved.as_str() {
        "reference" | "debug" => Ok(Arc::new(|| {
            Box::new(ReferenceBackend::new()) as Box<dyn Backend>
        })),
        _ => Err(UnknownLibrary { name: resolved }),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn null_refs_are_null() {
        assert!(DeviceRef::NULL.is_null());
        assert!(ObjectRef::NULL.is_null());
        assert!(!ObjectRef(1).is_null());
    }

    #[rstest]
    fn reference_library_resolves() {
        assert!(resolve("reference").is_ok());
        assert!(resolve("debug").is_ok());
    }

    #[rstest]
    fn unknown_library_is_an_error() {
        let err = match resolve("no-such-backend") {
            Err(e) => e,
            Ok(_) => panic!("expected resolve to fail for unknown backend"),
        };
        assert_eq!(err.name, "no-such-backend");
    }
}
