//! Built-in software backend.
//!
//! Backs the `"reference"` and `"debug"` library names: a small in-process
//! device that stores objects and parameters, fills arrays, and renders a
//! gradient colour channel plus a constant depth channel. It records every
//! call it receives, which makes it the scriptable double the test suite
//! drives sessions against.
//!
//! Frame behaviour: the colour channel is always present, 8-bit sRGB RGBA,
//! sized by the frame's `size` parameter (`UInt32Vec2`, default 640x480).
//! The depth channel (32-bit float, constant 1.0) is present only when the
//! frame object carries a `channel.depth` parameter.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use log::{debug, info, warn};

use super::{Backend, DeviceRef, InfoValue, MappedFrame, ObjectRef, Property, PropertyValue};
use crate::protocol::{ArrayInfo, DataType, ParameterSpec, WaitMask};

const DEFAULT_FRAME_SIZE: (u32, u32) = (640, 480);

#[derive(Debug, Default)]
struct ArrayState {
    info: ArrayInfo,
    data: Vec<u8>,
    mapped: bool,
}

#[derive(Debug, Default)]
struct ObjectState {
    kind: DataType,
    subtype: Option<String>,
    params: BTreeMap<String, (DataType, Vec<u8>)>,
    array: Option<ArrayState>,
    refcount: i64,
}

#[derive(Debug, Default)]
struct DeviceState {
    subtype: String,
    params: BTreeMap<String, (DataType, Vec<u8>)>,
    objects: HashMap<u64, ObjectState>,
}

#[derive(Debug, Default)]
struct State {
    next_ref: u64,
    devices: HashMap<u64, DeviceState>,
    calls: Vec<String>,
}

impl State {
    fn allocate(&mut self) -> u64 {
        self.next_ref += 1;
        self.next_ref
    }

    fn object_mut(&mut self, device: DeviceRef, object: ObjectRef) -> Option<&mut ObjectState> {
        self.devices
            .get_mut(&device.0)
            .and_then(|dev| dev.objects.get_mut(&object.0))
    }

    /// Parameters of the target: the device's own when the object
    /// reference names the device itself.
    fn params_mut(
        &mut self,
        device: DeviceRef,
        object: ObjectRef,
    ) -> Option<&mut BTreeMap<String, (DataType, Vec<u8>)>> {
        if object.0 == device.0 {
            return self.devices.get_mut(&device.0).map(|dev| &mut dev.params);
        }
        self.object_mut(device, object).map(|obj| &mut obj.params)
    }
}

/// In-process software backend; cloning yields another handle onto the
/// same device state, so tests can inspect what a session did.
#[derive(Clone, Debug, Default)]
pub struct ReferenceBackend {
    state: Arc<Mutex<State>>,
}

impl ReferenceBackend {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call recorded so far, in invocation order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> { self.lock().calls.clone() }

    /// Number of recorded calls whose record starts with `prefix`.
    #[must_use]
    pub fn calls_with_prefix(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    /// Current contents of an array's storage.
    #[must_use]
    pub fn array_data(&self, device: DeviceRef, array: ObjectRef) -> Option<Vec<u8>> {
        self.lock()
            .object_mut(device, array)
            .and_then(|obj| obj.array.as_ref().map(|arr| arr.data.clone()))
    }

    /// Stored value of a parameter on an object (or on the device itself).
    #[must_use]
    pub fn parameter(
        &self,
        device: DeviceRef,
        object: ObjectRef,
        name: &str,
    ) -> Option<(DataType, Vec<u8>)> {
        self.lock()
            .params_mut(device, object)
            .and_then(|params| params.get(name).cloned())
    }

    /// Subtype a device was created with.
    #[must_use]
    pub fn device_subtype(&self, device: DeviceRef) -> Option<String> {
        self.lock()
            .devices
            .get(&device.0)
            .map(|dev| dev.subtype.clone())
    }

    /// Type and subtype an object was constructed with.
    #[must_use]
    pub fn object_kind(&self, device: DeviceRef, object: ObjectRef) -> Option<(DataType, Option<String>)> {
        self.lock()
            .object_mut(device, object)
            .map(|obj| (obj.kind, obj.subtype.clone()))
    }

    /// Descriptor an array was created with.
    #[must_use]
    pub fn array_info(&self, device: DeviceRef, array: ObjectRef) -> Option<ArrayInfo> {
        self.lock()
            .object_mut(device, array)
            .and_then(|obj| obj.array.as_ref().map(|arr| arr.info))
    }

    /// Current reference count of an object.
    #[must_use]
    pub fn refcount(&self, device: DeviceRef, object: ObjectRef) -> Option<i64> {
        self.lock()
            .object_mut(device, object)
            .map(|obj| obj.refcount)
    }

    fn frame_size(state: &mut State, device: DeviceRef, frame: ObjectRef) -> (u32, u32) {
        let Some(obj) = state.object_mut(device, frame) else {
            return DEFAULT_FRAME_SIZE;
        };
        match obj.params.get("size") {
            Some((DataType::UInt32Vec2, bytes)) if bytes.len() == 8 => {
                let width = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                let height = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
                (width, height)
            }
            _ => DEFAULT_FRAME_SIZE,
        }
    }

    fn color_pixels(width: u32, height: u32) -> Bytes {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                data.push((x * 255 / width.max(1)) as u8);
                data.push((y * 255 / height.max(1)) as u8);
                data.push(0x80);
                data.push(0xff);
            }
        }
        Bytes::from(data)
    }

    fn depth_pixels(width: u32, height: u32) -> Bytes {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&1.0f32.to_le_bytes());
        }
        Bytes::from(data)
    }
}

impl Backend for ReferenceBackend {
    fn new_device(&mut self, subtype: &str) -> Option<DeviceRef> {
        let mut state = self.lock();
        state.calls.push(format!("new_device {subtype}"));
        let device = state.allocate();
        state.devices.insert(
            device,
            DeviceState {
                subtype: subtype.to_owned(),
                ..DeviceState::default()
            },
        );
        info!("reference backend: device created: subtype={subtype}, device={device:#x}");
        Some(DeviceRef(device))
    }

    fn new_object(
        &mut self,
        device: DeviceRef,
        kind: DataType,
        subtype: Option<&str>,
    ) -> ObjectRef {
        let mut state = self.lock();
        state
            .calls
            .push(format!("new_object {kind:?} {}", subtype.unwrap_or("-")));
        if !state.devices.contains_key(&device.0) {
            warn!("reference backend: new_object on unknown device: device={device}");
            return ObjectRef::NULL;
        }
        let object = state.allocate();
        if let Some(dev) = state.devices.get_mut(&device.0) {
            dev.objects.insert(
                object,
                ObjectState {
                    kind,
                    subtype: subtype.map(str::to_owned),
                    refcount: 1,
                    ..ObjectState::default()
                },
            );
        }
        ObjectRef(object)
    }

    fn new_array(&mut self, device: DeviceRef, info: &ArrayInfo) -> ObjectRef {
        let mut state = self.lock();
        state.calls.push(format!(
            "new_array {:?} {:?} {}x{}x{}",
            info.kind, info.element, info.items1, info.items2, info.items3
        ));
        if !state.devices.contains_key(&device.0) {
            warn!("reference backend: new_array on unknown device: device={device}");
            return ObjectRef::NULL;
        }
        let object = state.allocate();
        if let Some(dev) = state.devices.get_mut(&device.0) {
            dev.objects.insert(
                object,
                ObjectState {
                    kind: info.kind,
                    refcount: 1,
                    array: Some(ArrayState {
                        info: *info,
                        data: vec![0; info.size_in_bytes() as usize],
                        mapped: false,
                    }),
                    ..ObjectState::default()
                },
            );
        }
        ObjectRef(object)
    }

    fn set_parameter(
        &mut self,
        device: DeviceRef,
        object: ObjectRef,
        name: &str,
        kind: DataType,
        value: &[u8],
    ) {
        let mut state = self.lock();
        state.calls.push(format!("set_parameter {name}"));
        if let Some(params) = state.params_mut(device, object) {
            params.insert(name.to_owned(), (kind, value.to_vec()));
        }
    }

    fn unset_parameter(&mut self, device: DeviceRef, object: ObjectRef, name: &str) {
        let mut state = self.lock();
        state.calls.push(format!("unset_parameter {name}"));
        if let Some(params) = state.params_mut(device, object) {
            params.remove(name);
        }
    }

    fn unset_all_parameters(&mut self, device: DeviceRef, object: ObjectRef) {
        let mut state = self.lock();
        state.calls.push("unset_all_parameters".to_owned());
        if let Some(params) = state.params_mut(device, object) {
            params.clear();
        }
    }

    fn commit_parameters(&mut self, device: DeviceRef, object: ObjectRef) {
        let mut state = self.lock();
        state.calls.push(format!(
            "commit_parameters {}",
            if object.0 == device.0 { "device" } else { "object" }
        ));
    }

    fn retain(&mut self, device: DeviceRef, object: ObjectRef) {
        let mut state = self.lock();
        state.calls.push("retain".to_owned());
        if let Some(obj) = state.object_mut(device, object) {
            obj.refcount += 1;
        }
    }

    fn release(&mut self, device: DeviceRef, object: ObjectRef) {
        let mut state = self.lock();
        state.calls.push("release".to_owned());
        if let Some(obj) = state.object_mut(device, object) {
            obj.refcount -= 1;
        }
    }

    fn map_array(&mut self, device: DeviceRef, array: ObjectRef) -> Bytes {
        let mut state = self.lock();
        state.calls.push("map_array".to_owned());
        match state.object_mut(device, array).and_then(|obj| obj.array.as_mut()) {
            Some(arr) => {
                arr.mapped = true;
                Bytes::from(arr.data.clone())
            }
            None => {
                warn!("reference backend: map_array on non-array: object={array}");
                Bytes::new()
            }
        }
    }

    fn write_array(&mut self, device: DeviceRef, array: ObjectRef, data: &[u8]) {
        let mut state = self.lock();
        state.calls.push("write_array".to_owned());
        if let Some(arr) = state.object_mut(device, array).and_then(|obj| obj.array.as_mut()) {
            if !arr.mapped {
                warn!("reference backend: write_array while unmapped: object={array}");
            }
            let len = data.len().min(arr.data.len());
            arr.data[..len].copy_from_slice(&data[..len]);
        }
    }

    fn unmap_array(&mut self, device: DeviceRef, array: ObjectRef) {
        let mut state = self.lock();
        state.calls.push("unmap_array".to_owned());
        if let Some(arr) = state.object_mut(device, array).and_then(|obj| obj.array.as_mut()) {
            arr.mapped = false;
        }
    }

    fn render_frame(&mut self, device: DeviceRef, frame: ObjectRef) {
        let mut state = self.lock();
        state.calls.push("render_frame".to_owned());
        debug!("reference backend: render: device={device}, frame={frame}");
    }

    fn frame_ready(&mut self, _device: DeviceRef, _frame: ObjectRef, wait: WaitMask) -> bool {
        let mut state = self.lock();
        state
            .calls
            .push(format!("frame_ready wait={}", wait.is_wait()));
        true
    }

    fn map_frame(
        &mut self,
        device: DeviceRef,
        frame: ObjectRef,
        channel: &str,
    ) -> Option<MappedFrame> {
        let mut state = self.lock();
        state.calls.push(format!("map_frame {channel}"));
        let (width, height) = Self::frame_size(&mut state, device, frame);
        match channel {
            "channel.color" => Some(MappedFrame {
                width,
                height,
                element: DataType::UFixed8RgbaSrgb,
                data: Self::color_pixels(width, height),
            }),
            "channel.depth" => {
                let enabled = state
                    .object_mut(device, frame)
                    .is_some_and(|obj| obj.params.contains_key("channel.depth"));
                enabled.then(|| MappedFrame {
                    width,
                    height,
                    element: DataType::Float32,
                    data: Self::depth_pixels(width, height),
                })
            }
            _ => None,
        }
    }

    fn get_property(
        &mut self,
        _device: DeviceRef,
        _object: ObjectRef,
        name: &str,
        kind: DataType,
        size: usize,
        _wait: WaitMask,
    ) -> Property {
        let mut state = self.lock();
        state.calls.push(format!("get_property {name}"));
        match (name, kind) {
            ("version", DataType::Int32) => {
                let mut value = 1i32.to_le_bytes().to_vec();
                value.resize(size, 0);
                Property {
                    code: 1,
                    value: PropertyValue::Pod(value),
                }
            }
            ("channel", DataType::StringList) => Property {
                code: 1,
                value: PropertyValue::StringList(vec![
                    "channel.color".to_owned(),
                    "channel.depth".to_owned(),
                ]),
            },
            (_, DataType::StringList) => Property {
                code: 0,
                value: PropertyValue::StringList(Vec::new()),
            },
            _ => Property {
                code: 0,
                value: PropertyValue::Pod(vec![0; size]),
            },
        }
    }

    fn object_subtypes(&mut self, _device: DeviceRef, kind: DataType) -> Vec<String> {
        let mut state = self.lock();
        state.calls.push(format!("object_subtypes {kind:?}"));
        let subtypes: &[&str] = match kind {
            DataType::Camera => &["perspective", "orthographic"],
            DataType::Light => &["directional", "point"],
            DataType::Geometry => &["triangle", "sphere"],
            DataType::Renderer => &["default"],
            _ => &[],
        };
        subtypes.iter().map(|&s| s.to_owned()).collect()
    }

    fn object_info(
        &mut self,
        _device: DeviceRef,
        kind: DataType,
        subtype: &str,
        info_name: &str,
        info_kind: DataType,
    ) -> Option<InfoValue> {
        let mut state = self.lock();
        state.calls.push(format!("object_info {info_name}"));
        match (info_name, info_kind) {
            ("description", DataType::String) => Some(InfoValue::Str(format!(
                "reference {subtype} {}",
                format!("{kind:?}").to_lowercase()
            ))),
            ("parameter", DataType::ParameterList) if kind == DataType::Camera => {
                Some(InfoValue::Parameters(vec![
                    ParameterSpec {
                        name: "aspect".to_owned(),
                        kind: DataType::Float32,
                        description: "width over height".to_owned(),
                    },
                    ParameterSpec {
                        name: "position".to_owned(),
                        kind: DataType::Float32Vec3,
                        description: "eye position".to_owned(),
                    },
                ]))
            }
            _ => None,
        }
    }

    fn parameter_info(
        &mut self,
        _device: DeviceRef,
        _kind: DataType,
        _subtype: &str,
        parameter_name: &str,
        _parameter_kind: DataType,
        info_name: &str,
        info_kind: DataType,
    ) -> Option<InfoValue> {
        let mut state = self.lock();
        state.calls.push(format!("parameter_info {parameter_name} {info_name}"));
        match (info_name, info_kind) {
            ("description", DataType::String) => {
                Some(InfoValue::Str(format!("{parameter_name} parameter")))
            }
            ("required", DataType::UInt8) => Some(InfoValue::Pod(vec![0])),
            _ => None,
        }
    }
}
