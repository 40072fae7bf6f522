//! Typed request demultiplexer.
//!
//! Every handler follows the same skeleton: parse the body with the wire
//! codec, look up referenced resources, invoke the backend, and post at
//! most one response. Handle validation failures log and drop the request
//! without a response — the protocol is one-way for most commands, and
//! closing the session on a single bad handle would strand legitimately
//! queued commands.

use log::{debug, error, warn};

use super::{Session, SessionError};
use crate::{
    backend::{Backend, DeviceRef, InfoValue, ObjectRef, PropertyValue},
    compress,
    protocol::{ArrayInfo, CompressionFeatures, DataType, Handle, MessageType, WaitMask},
    wire::{Reader, WireError, Writer},
};

/// Object types with a backend constructor.
const CONSTRUCTIBLE: [DataType; 13] = [
    DataType::Light,
    DataType::Camera,
    DataType::Geometry,
    DataType::SpatialField,
    DataType::Surface,
    DataType::Volume,
    DataType::Material,
    DataType::Sampler,
    DataType::Group,
    DataType::Instance,
    DataType::World,
    DataType::Frame,
    DataType::Renderer,
];

/// Whether a constructor forwards the subtype string.
fn takes_subtype(kind: DataType) -> bool {
    !matches!(
        kind,
        DataType::Surface | DataType::Group | DataType::World | DataType::Frame
    )
}

impl<B: Backend> Session<B> {
    pub(super) fn on_new_device(&mut self, reader: &mut Reader<'_>) -> Result<(), SessionError> {
        let subtype = reader.read_string()?;
        self.peer_features = CompressionFeatures::read(reader)?;

        let device = self.backend.new_device(&subtype).unwrap_or(DeviceRef::NULL);
        if device.is_null() {
            error!("backend provided no device: subtype={subtype}");
        }
        let handle = self.resources.register_device(device);
        let server_features = compress::local_features();

        let mut body = Writer::new();
        handle.write(&mut body);
        server_features.write(&mut body);
        self.post(MessageType::DeviceHandle, body);

        debug!(
            "device created: subtype={subtype}, handle={handle}, backend={device}, \
             peer lossy_color={}, peer lossless_depth={}",
            self.peer_features.lossy_color, self.peer_features.lossless_depth
        );
        Ok(())
    }

    pub(super) fn on_new_object(&mut self, reader: &mut Reader<'_>) -> Result<(), SessionError> {
        let device_handle = Handle::read(reader)?;
        let kind = DataType::read(reader)?;
        let subtype = reader.read_string()?;
        let object_handle = Handle::read(reader)?;

        let Some(device) = self.require_device("create object", device_handle) else {
            return Ok(());
        };
        let object = if CONSTRUCTIBLE.contains(&kind) {
            let subtype = takes_subtype(kind).then_some(subtype.as_str());
            self.backend.new_object(device, kind, subtype)
        } else {
            warn!("no constructor for object type: kind={kind:?}, object={object_handle}");
            ObjectRef::NULL
        };
        if !self
            .resources
            .register_object(device_handle, object_handle, object, kind)
        {
            error!(
                "object registration refused: device={device_handle}, object={object_handle}"
            );
            return Ok(());
        }
        debug!(
            "object created: kind={kind:?}, object={object_handle}, backend={object}"
        );
        Ok(())
    }

    pub(super) fn on_new_array(&mut self, reader: &mut Reader<'_>) -> Result<(), SessionError> {
        let device_handle = Handle::read(reader)?;
        let kind = DataType::read(reader)?;
        let object_handle = Handle::read(reader)?;
        let element = DataType::read(reader)?;
        let info = ArrayInfo {
            kind,
            element,
            items1: reader.read_u64()?,
            items2: reader.read_u64()?,
            items3: reader.read_u64()?,
        };

        let Some(device) = self.require_device("create array", device_handle) else {
            return Ok(());
        };

        // A body with trailing bytes carries the initial payload; without
        // them the array is created uninitialised.
        let payload = if reader.remaining() > 0 {
            Some(self.translate_array_payload(reader, device_handle, &info)?)
        } else {
            None
        };

        let array = self.backend.new_array(device, &info);
        if let Some(data) = payload {
            if !array.is_null() {
                self.backend.map_array(device, array);
                self.backend.write_array(device, array, &data);
                self.backend.unmap_array(device, array);
            }
        }
        if !self
            .resources
            .register_array(device_handle, object_handle, array, info)
        {
            error!(
                "array registration refused: device={device_handle}, object={object_handle}"
            );
            return Ok(());
        }
        debug!(
            "array created: kind={kind:?}, element={element:?}, object={object_handle}, \
             backend={array}, bytes={}",
            info.size_in_bytes()
        );
        Ok(())
    }

    pub(super) fn on_set_param(&mut self, reader: &mut Reader<'_>) -> Result<(), SessionError> {
        let device_handle = Handle::read(reader)?;
        let object_handle = Handle::read(reader)?;
        let Some((device, target)) =
            self.require_object("set parameter", device_handle, object_handle)
        else {
            return Ok(());
        };
        let name = reader.read_string()?;
        let kind = DataType::read(reader)?;

        if kind.is_object() {
            // Object-typed values travel as 64-bit handles and are
            // resolved to backend references before the call.
            let value_handle = Handle::read(reader)?;
            let value = self.resources.server_object(device_handle, value_handle);
            if value.object.is_null() {
                error!(
                    "set parameter: invalid value handle: name={name}, \
                     device={device_handle}, value={value_handle}"
                );
                return Ok(());
            }
            self.backend
                .set_parameter(device, target, &name, kind, &value.object.0.to_le_bytes());
            debug!(
                "parameter set: name={name}, object={object_handle}, \
                 value handle={value_handle}, backend={}",
                value.object
            );
        } else {
            let value = reader.read_bytes(kind.element_size())?;
            self.backend.set_parameter(device, target, &name, kind, value);
            debug!("parameter set: name={name}, object={object_handle}, kind={kind:?}");
        }
        Ok(())
    }

    pub(super) fn on_unset_param(&mut self, reader: &mut Reader<'_>) -> Result<(), SessionError> {
        let device_handle = Handle::read(reader)?;
        let object_handle = Handle::read(reader)?;
        let Some((device, target)) =
            self.require_object("unset parameter", device_handle, object_handle)
        else {
            return Ok(());
        };
        let name = reader.read_string()?;
        self.backend.unset_parameter(device, target, &name);
        Ok(())
    }

    pub(super) fn on_unset_all_params(
        &mut self,
        reader: &mut Reader<'_>,
    ) -> Result<(), SessionError> {
        let device_handle = Handle::read(reader)?;
        let object_handle = Handle::read(reader)?;
        let Some((device, target)) =
            self.require_object("unset all parameters", device_handle, object_handle)
        else {
            return Ok(());
        };
        self.backend.unset_all_parameters(device, target);
        Ok(())
    }

    pub(super) fn on_commit_params(&mut self, reader: &mut Reader<'_>) -> Result<(), SessionError> {
        // The discriminator is the body length and is part of the wire
        // contract: a single handle commits the device itself.
        if reader.remaining() == 8 {
            let device_handle = Handle::read(reader)?;
            let Some(device) = self.require_device("commit device parameters", device_handle)
            else {
                return Ok(());
            };
            self.backend.commit_parameters(device, device.as_object());
            debug!("device committed: device={device_handle}");
        } else {
            let device_handle = Handle::read(reader)?;
            let object_handle = Handle::read(reader)?;
            let Some((device, target)) =
                self.require_object("commit parameters", device_handle, object_handle)
            else {
                return Ok(());
            };
            self.backend.commit_parameters(device, target);
            debug!("object committed: device={device_handle}, object={object_handle}");
        }
        Ok(())
    }

    pub(super) fn on_release(&mut self, reader: &mut Reader<'_>) -> Result<(), SessionError> {
        let device_handle = Handle::read(reader)?;
        let object_handle = Handle::read(reader)?;
        let Some((device, target)) =
            self.require_object("release object", device_handle, object_handle)
        else {
            return Ok(());
        };
        self.backend.release(device, target);
        debug!("object released: device={device_handle}, object={object_handle}");
        Ok(())
    }

    pub(super) fn on_retain(&mut self, reader: &mut Reader<'_>) -> Result<(), SessionError> {
        let device_handle = Handle::read(reader)?;
        let object_handle = Handle::read(reader)?;
        let Some((device, target)) =
            self.require_object("retain object", device_handle, object_handle)
        else {
            return Ok(());
        };
        self.backend.retain(device, target);
        debug!("object retained: device={device_handle}, object={object_handle}");
        Ok(())
    }

    pub(super) fn on_map_array(&mut self, reader: &mut Reader<'_>) -> Result<(), SessionError> {
        let device_handle = Handle::read(reader)?;
        let object_handle = Handle::read(reader)?;
        let Some((device, target)) =
            self.require_object("map array", device_handle, object_handle)
        else {
            return Ok(());
        };

        // The array stays mapped; the peer still holds the mapping until
        // its unmap request arrives.
        let mut data = self.backend.map_array(device, target).to_vec();
        let info = self.resources.array_info(device_handle, object_handle);
        let num_bytes = info.size_in_bytes();
        data.resize(num_bytes as usize, 0);

        let mut body = Writer::new();
        object_handle.write(&mut body);
        body.write_u64(num_bytes);
        body.write_bytes(&data);
        self.post(MessageType::ArrayMapped, body);

        debug!("array mapped: object={object_handle}, bytes={num_bytes}");
        Ok(())
    }

    pub(super) fn on_unmap_array(&mut self, reader: &mut Reader<'_>) -> Result<(), SessionError> {
        let device_handle = Handle::read(reader)?;
        let object_handle = Handle::read(reader)?;
        let Some((device, target)) =
            self.require_object("unmap array", device_handle, object_handle)
        else {
            return Ok(());
        };

        // The array arrives mapped: unmap, remap for writing, write the
        // translated payload, unmap again.
        self.backend.unmap_array(device, target);
        self.backend.map_array(device, target);
        if reader.remaining() > 0 {
            let info = self.resources.array_info(device_handle, object_handle);
            let data = self.translate_array_payload(reader, device_handle, &info)?;
            self.backend.write_array(device, target, &data);
        }
        self.backend.unmap_array(device, target);

        let mut body = Writer::new();
        object_handle.write(&mut body);
        self.post(MessageType::ArrayUnmapped, body);

        debug!("array unmapped: object={object_handle}");
        Ok(())
    }

    pub(super) fn on_frame_ready(&mut self, reader: &mut Reader<'_>) -> Result<(), SessionError> {
        let device_handle = Handle::read(reader)?;
        let object_handle = Handle::read(reader)?;
        let Some(device) = self.require_device("wait on frame", device_handle) else {
            return Ok(());
        };
        let wait = WaitMask::read(reader)?;

        let frame = self.resources.server_object(device_handle, object_handle).object;
        self.backend.frame_ready(device, frame, wait);

        let mut body = Writer::new();
        object_handle.write(&mut body);
        self.post(MessageType::FrameIsReady, body);

        debug!("frame readiness signalled: frame={object_handle}, wait={}", wait.is_wait());
        Ok(())
    }

    pub(super) fn on_get_property(&mut self, reader: &mut Reader<'_>) -> Result<(), SessionError> {
        let device_handle = Handle::read(reader)?;
        let object_handle = Handle::read(reader)?;
        let Some(device) = self.require_device("get property", device_handle) else {
            return Ok(());
        };
        // An unknown object handle retargets the query at the device
        // itself.
        let record = self.resources.server_object(device_handle, object_handle);
        let target = if record.object.is_null() {
            device.as_object()
        } else {
            record.object
        };

        let name = reader.read_string()?;
        let kind = DataType::read(reader)?;
        let size = reader.read_u64()? as usize;
        let wait = WaitMask::read(reader)?;

        if kind == DataType::DataTypeList {
            error!("get property: data-type-list payloads are unsupported: name={name}");
            return Err(SessionError::UnsupportedPropertyType);
        }

        let property = self.backend.get_property(device, target, &name, kind, size, wait);

        let mut body = Writer::new();
        object_handle.write(&mut body);
        body.write_string(&name);
        body.write_i32(property.code);
        if kind == DataType::StringList {
            let list = match property.value {
                PropertyValue::StringList(list) => list,
                PropertyValue::Pod(_) => Vec::new(),
            };
            body.write_string_list(&list);
        } else {
            let mut value = match property.value {
                PropertyValue::Pod(value) => value,
                PropertyValue::StringList(_) => Vec::new(),
            };
            value.resize(size, 0);
            body.write_bytes(&value);
        }
        self.post(MessageType::Property, body);

        debug!("property queried: name={name}, object={object_handle}, kind={kind:?}");
        Ok(())
    }

    pub(super) fn on_get_object_subtypes(
        &mut self,
        reader: &mut Reader<'_>,
    ) -> Result<(), SessionError> {
        let device_handle = Handle::read(reader)?;
        let kind = DataType::read(reader)?;
        let Some(device) = self.require_device("query object subtypes", device_handle) else {
            return Ok(());
        };

        let subtypes = self.backend.object_subtypes(device, kind);

        let mut body = Writer::new();
        kind.write(&mut body);
        body.write_string_list(&subtypes);
        self.post(MessageType::ObjectSubtypes, body);
        Ok(())
    }

    pub(super) fn on_get_object_info(
        &mut self,
        reader: &mut Reader<'_>,
    ) -> Result<(), SessionError> {
        let device_handle = Handle::read(reader)?;
        let kind = DataType::read(reader)?;
        let subtype = reader.read_string()?;
        let info_name = reader.read_string()?;
        let info_kind = DataType::read(reader)?;
        let Some(device) = self.require_device("query object info", device_handle) else {
            return Ok(());
        };

        let mut body = Writer::new();
        kind.write(&mut body);
        body.write_string(&subtype);
        body.write_string(&info_name);
        info_kind.write(&mut body);
        if let Some(info) = self
            .backend
            .object_info(device, kind, &subtype, &info_name, info_kind)
        {
            write_info_value(&mut body, &info);
        }
        self.post(MessageType::ObjectInfo, body);
        Ok(())
    }

    pub(super) fn on_get_parameter_info(
        &mut self,
        reader: &mut Reader<'_>,
    ) -> Result<(), SessionError> {
        let device_handle = Handle::read(reader)?;
        let kind = DataType::read(reader)?;
        let subtype = reader.read_string()?;
        let parameter_name = reader.read_string()?;
        let parameter_kind = DataType::read(reader)?;
        let info_name = reader.read_string()?;
        let info_kind = DataType::read(reader)?;
        let Some(device) = self.require_device("query parameter info", device_handle) else {
            return Ok(());
        };

        let mut body = Writer::new();
        kind.write(&mut body);
        body.write_string(&subtype);
        body.write_string(&parameter_name);
        parameter_kind.write(&mut body);
        body.write_string(&info_name);
        info_kind.write(&mut body);
        if let Some(info) = self.backend.parameter_info(
            device,
            kind,
            &subtype,
            &parameter_name,
            parameter_kind,
            &info_name,
            info_kind,
        ) {
            write_info_value(&mut body, &info);
        }
        self.post(MessageType::ParameterInfo, body);
        Ok(())
    }

    /// Copy an array payload out of the body, rewriting object handles.
    ///
    /// Object-typed elements arrive as densely packed 64-bit client
    /// handles; each 8-byte slot is rewritten in place to the backend
    /// reference. An unknown handle is substituted with the null
    /// reference. Other element types are forwarded byte for byte.
    pub(super) fn translate_array_payload(
        &self,
        reader: &mut Reader<'_>,
        device_handle: Handle,
        info: &ArrayInfo,
    ) -> Result<Vec<u8>, WireError> {
        let mut data = reader.read_bytes(info.size_in_bytes() as usize)?.to_vec();
        if info.element.is_object() {
            for slot in data.chunks_exact_mut(8) {
                let client = Handle(u64::from_le_bytes([
                    slot[0], slot[1], slot[2], slot[3], slot[4], slot[5], slot[6], slot[7],
                ]));
                let record = self.resources.server_object(device_handle, client);
                if record.object.is_null() {
                    warn!(
                        "unknown object handle in array payload: device={device_handle}, \
                         handle={client}; substituting null"
                    );
                }
                slot.copy_from_slice(&record.object.0.to_le_bytes());
            }
        }
        Ok(data)
    }

    pub(super) fn require_device(&self, context: &str, device: Handle) -> Option<DeviceRef> {
        let found = self.resources.device(device);
        if found.is_none() {
            error!("{context}: invalid device handle: device={device}");
        }
        found
    }

    pub(super) fn require_object(
        &self,
        context: &str,
        device: Handle,
        object: Handle,
    ) -> Option<(DeviceRef, ObjectRef)> {
        let device_ref = self.require_device(context, device)?;
        let record = self.resources.server_object(device, object);
        if record.object.is_null() {
            error!("{context}: invalid object handle: device={device}, object={object}");
            return None;
        }
        Some((device_ref, record.object))
    }
}

fn write_info_value(body: &mut Writer, info: &InfoValue) {
    match info {
        InfoValue::Str(value) => body.write_string(value),
        InfoValue::StringList(list) => body.write_string_list(list),
        InfoValue::Parameters(list) => body.write_parameter_list(list),
        InfoValue::Pod(bytes) => body.write_bytes(bytes),
    }
}
