//! Per-session handle tables mapping wire handles to backend references.
//!
//! Handles are treated as direct indices: device handles are allocated by
//! the server from 1 upward, object handles arrive from the client and may
//! be sparse. Tables grow on demand up to a configurable ceiling; a handle
//! above the ceiling is reported as a miss instead of growing the table,
//! so a hostile handle cannot force unbounded allocation.

use crate::{
    backend::{DeviceRef, ObjectRef},
    protocol::{ArrayInfo, DataType, Handle},
};

/// Largest handle value accepted before registration is refused.
pub const DEFAULT_HANDLE_CEILING: u64 = 1 << 20;

/// One registered object: owning device, backend reference and type tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerObject {
    pub device: DeviceRef,
    pub object: ObjectRef,
    pub kind: DataType,
}

/// Device, object and array tables for one session.
#[derive(Debug)]
pub struct ResourceManager {
    next_device: u64,
    devices: Vec<DeviceRef>,
    objects: Vec<Vec<ServerObject>>,
    arrays: Vec<Vec<ArrayInfo>>,
    handle_ceiling: u64,
}

impl Default for ResourceManager {
    fn default() -> Self { Self::new(DEFAULT_HANDLE_CEILING) }
}

impl ResourceManager {
    #[must_use]
    pub fn new(handle_ceiling: u64) -> Self {
        Self {
            next_device: 1,
            devices: Vec::new(),
            objects: Vec::new(),
            arrays: Vec::new(),
            handle_ceiling,
        }
    }

    /// Allocate the next device handle and store its backend reference.
    ///
    /// Device handles start at 1; slot 0 stays unused so a zero handle is
    /// always a miss.
    pub fn register_device(&mut self, device: DeviceRef) -> Handle {
        let handle = Handle(self.next_device);
        self.next_device += 1;
        let len = self.devices.len().max(handle.0 as usize + 1);
        self.devices.resize(len, DeviceRef::NULL);
        self.objects.resize(len, Vec::new());
        self.arrays.resize(len, Vec::new());
        self.devices[handle.0 as usize] = device;
        handle
    }

    /// Store an object record at a client-assigned handle.
    ///
    /// Overwrites any previous record at the same slot. Returns `false`
    /// when the device handle is unknown or the object handle exceeds the
    /// ceiling; nothing is stored in that case.
    pub fn register_object(
        &mut self,
        device: Handle,
        object: Handle,
        backend: ObjectRef,
        kind: DataType,
    ) -> bool {
        if object.0 > self.handle_ceiling {
            return false;
        }
        let Some(device_ref) = self.device(device) else {
            return false;
        };
        let table = &mut self.objects[device.0 as usize];
        let len = table.len().max(object.0 as usize + 1);
        table.resize(len, ServerObject::default());
        table[object.0 as usize] = ServerObject {
            device: device_ref,
            object: backend,
            kind,
        };
        true
    }

    /// Store an array record plus the descriptor needed for later maps.
    pub fn register_array(
        &mut self,
        device: Handle,
        object: Handle,
        backend: ObjectRef,
        info: ArrayInfo,
    ) -> bool {
        if !self.register_object(device, object, backend, info.kind) {
            return false;
        }
        let table = &mut self.arrays[device.0 as usize];
        let len = table.len().max(object.0 as usize + 1);
        table.resize(len, ArrayInfo::default());
        table[object.0 as usize] = info;
        true
    }

    /// Backend reference for a device handle, or `None` on a miss.
    #[must_use]
    pub fn device(&self, handle: Handle) -> Option<DeviceRef> {
        self.devices
            .get(handle.0 as usize)
            .copied()
            .filter(|device| !device.is_null())
    }

    /// Stored object record, or a zero-initialised record on a miss.
    #[must_use]
    pub fn server_object(&self, device: Handle, object: Handle) -> ServerObject {
        self.objects
            .get(device.0 as usize)
            .and_then(|table| table.get(object.0 as usize))
            .copied()
            .unwrap_or_default()
    }

    /// Stored array descriptor, or a zero-sized descriptor on a miss.
    #[must_use]
    pub fn array_info(&self, device: Handle, object: Handle) -> ArrayInfo {
        self.arrays
            .get(device.0 as usize)
            .and_then(|table| table.get(object.0 as usize))
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn manager() -> ResourceManager { ResourceManager::default() }

    #[rstest]
    fn first_device_handle_is_one() {
        let mut resources = manager();
        let handle = resources.register_device(DeviceRef(0x10));
        assert_eq!(handle, Handle(1));
        assert_eq!(resources.device(handle), Some(DeviceRef(0x10)));
    }

    #[rstest]
    fn device_handles_increase_monotonically() {
        let mut resources = manager();
        assert_eq!(resources.register_device(DeviceRef(1)), Handle(1));
        assert_eq!(resources.register_device(DeviceRef(2)), Handle(2));
        assert_eq!(resources.register_device(DeviceRef(3)), Handle(3));
    }

    #[rstest]
    #[case(Handle(0))]
    #[case(Handle(5))]
    #[case(Handle(u64::MAX))]
    fn unknown_device_handles_miss(#[case] handle: Handle) {
        let mut resources = manager();
        resources.register_device(DeviceRef(1));
        assert_eq!(resources.device(handle), None);
    }

    #[rstest]
    fn sparse_object_handles_are_direct_indices() {
        let mut resources = manager();
        let dev = resources.register_device(DeviceRef(7));
        assert!(resources.register_object(dev, Handle(42), ObjectRef(0xbeef), DataType::Camera));

        let record = resources.server_object(dev, Handle(42));
        assert_eq!(record.object, ObjectRef(0xbeef));
        assert_eq!(record.kind, DataType::Camera);
        assert_eq!(record.device, DeviceRef(7));

        // The gap below the stored handle reads back as zeroed records.
        assert_eq!(resources.server_object(dev, Handle(41)), ServerObject::default());
        assert!(resources.server_object(dev, Handle(41)).object.is_null());
    }

    #[rstest]
    fn registering_twice_overwrites() {
        let mut resources = manager();
        let dev = resources.register_device(DeviceRef(7));
        resources.register_object(dev, Handle(3), ObjectRef(1), DataType::Surface);
        resources.register_object(dev, Handle(3), ObjectRef(2), DataType::Surface);
        assert_eq!(resources.server_object(dev, Handle(3)).object, ObjectRef(2));
    }

    #[rstest]
    fn array_registration_stores_descriptor() {
        let mut resources = manager();
        let dev = resources.register_device(DeviceRef(7));
        let info = ArrayInfo {
            kind: DataType::Array1D,
            element: DataType::Float32,
            items1: 16,
            items2: 0,
            items3: 0,
        };
        assert!(resources.register_array(dev, Handle(20), ObjectRef(9), info));
        assert_eq!(resources.array_info(dev, Handle(20)), info);
        assert_eq!(resources.server_object(dev, Handle(20)).kind, DataType::Array1D);
    }

    #[rstest]
    fn array_info_misses_are_zero_sized() {
        let mut resources = manager();
        let dev = resources.register_device(DeviceRef(7));
        assert_eq!(resources.array_info(dev, Handle(99)).size_in_bytes(), 0);
        assert_eq!(resources.array_info(Handle(9), Handle(0)).size_in_bytes(), 0);
    }

    #[rstest]
    fn handles_above_the_ceiling_are_refused() {
        let mut resources = ResourceManager::new(64);
        let dev = resources.register_device(DeviceRef(7));
        assert!(!resources.register_object(dev, Handle(65), ObjectRef(1), DataType::Light));
        assert!(resources.server_object(dev, Handle(65)).object.is_null());
        assert!(resources.register_object(dev, Handle(64), ObjectRef(1), DataType::Light));
    }

    #[rstest]
    fn registering_against_unknown_device_is_refused() {
        let mut resources = manager();
        assert!(!resources.register_object(Handle(1), Handle(1), ObjectRef(1), DataType::Light));
    }
}
