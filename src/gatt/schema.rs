use std::collections::BTreeMap;

use smallvec::SmallVec;

use super::*;

/// Declared GATT topology: services keyed by UUID, each owning an ordered
/// collection of characteristics and their descriptors. Entries are mutable
/// until the service is handed to the platform stack, after which the
/// topology is frozen.
#[derive(Debug)]
pub(super) struct Schema {
    services: BTreeMap<Uuid, Service>,
    /// Attributes consumed by all declared services: one per service
    /// declaration, two per characteristic, one per descriptor.
    attrs: usize,
    capacity: usize,
}

impl Schema {
    /// Creates an empty schema with the specified attribute-table capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            services: BTreeMap::new(),
            attrs: 0,
            capacity,
        }
    }

    /// Declares an empty primary service, replacing any prior entry with the
    /// same UUID. A replaced entry loses its published flag; the platform
    /// stack may still hold the old copy until the process restarts, in which
    /// case re-publishing fails there.
    pub fn declare(&mut self, uuid: Uuid) {
        let svc = Service {
            uuid,
            primary: true,
            published: false,
            chars: Vec::new(),
        };
        if let Some(old) = self.services.insert(uuid, svc) {
            self.attrs -= old.attr_len();
        }
        self.attrs += 1;
    }

    /// Returns the declared service.
    #[inline]
    pub fn service(&self, uuid: Uuid) -> Option<&Service> {
        self.services.get(&uuid)
    }

    /// Returns the first characteristic matching `(service, characteristic)`.
    pub fn characteristic(&self, service: Uuid, characteristic: Uuid) -> Option<&Characteristic> {
        (self.services.get(&service)).and_then(|s| s.chars.iter().find(|c| c.uuid == characteristic))
    }

    /// Mutable variant of [`Self::characteristic`].
    pub fn characteristic_mut(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Option<&mut Characteristic> {
        (self.services.get_mut(&service))
            .and_then(|s| s.chars.iter_mut().find(|c| c.uuid == characteristic))
    }

    /// Appends a characteristic to a declared, unpublished service. NOTIFY or
    /// INDICATE properties get a Client Characteristic Configuration
    /// descriptor synthesized immediately so that the published attribute
    /// table is always subscribable.
    pub fn add_characteristic(
        &mut self,
        service: Uuid,
        uuid: Uuid,
        props: Prop,
        perms: Perm,
    ) -> Result<()> {
        let cost = 2 + usize::from(props.needs_ccc());
        let svc = self.services.get_mut(&service).ok_or(Error::NotFound(service))?;
        if svc.published {
            return Err(Error::AlreadyPublished(service));
        }
        if self.attrs + cost > self.capacity {
            return Err(Error::Capacity(self.capacity));
        }
        let mut chr = Characteristic {
            uuid,
            props,
            perms,
            value: Vec::new(),
            descs: SmallVec::new(),
        };
        if props.needs_ccc() {
            chr.descs.push(Descriptor::client_cfg());
        }
        svc.chars.push(chr);
        self.attrs += cost;
        Ok(())
    }

    /// Appends a descriptor to a declared characteristic. An explicit CCC
    /// descriptor replaces the synthesized one instead of duplicating it.
    pub fn add_descriptor(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        uuid: Uuid,
        perms: Perm,
        value: Vec<u8>,
    ) -> Result<()> {
        let svc = self.services.get_mut(&service).ok_or(Error::NotFound(service))?;
        if svc.published {
            return Err(Error::AlreadyPublished(service));
        }
        let at_capacity = self.attrs >= self.capacity;
        let chr = (svc.chars.iter_mut().find(|c| c.uuid == characteristic))
            .ok_or(Error::NotFound(characteristic))?;
        if uuid == CLIENT_CHARACTERISTIC_CONFIGURATION {
            if let Some(d) = (chr.descs.iter_mut()).find(|d| d.uuid == CLIENT_CHARACTERISTIC_CONFIGURATION) {
                d.perms = perms;
                d.value = value;
                return Ok(());
            }
        }
        if at_capacity {
            return Err(Error::Capacity(self.capacity));
        }
        chr.descs.push(Descriptor { uuid, perms, value });
        self.attrs += 1;
        Ok(())
    }

    /// Marks the service as handed to the platform stack, freezing its
    /// topology.
    pub fn mark_published(&mut self, uuid: Uuid) {
        if let Some(svc) = self.services.get_mut(&uuid) {
            svc.published = true;
        }
    }

    /// Returns the total number of attributes declared.
    #[cfg(test)]
    pub(super) fn attr_len(&self) -> usize {
        self.attrs
    }
}

/// A declared primary service.
#[derive(Clone, Debug)]
pub struct Service {
    uuid: Uuid,
    primary: bool,
    published: bool,
    chars: Vec<Characteristic>,
}

impl Service {
    /// Returns the service UUID.
    #[inline]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns whether the service is primary.
    #[inline]
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.primary
    }

    /// Returns whether the service was handed to the platform stack.
    #[inline]
    #[must_use]
    pub const fn is_published(&self) -> bool {
        self.published
    }

    /// Returns the declared characteristics in declaration order.
    #[inline]
    #[must_use]
    pub fn characteristics(&self) -> &[Characteristic] {
        &self.chars
    }

    /// Returns the number of attributes the service occupies.
    fn attr_len(&self) -> usize {
        1 + (self.chars.iter()).map(|c| 2 + c.descs.len()).sum::<usize>()
    }
}

/// A declared characteristic and its current value.
#[derive(Clone, Debug)]
pub struct Characteristic {
    uuid: Uuid,
    props: Prop,
    perms: Perm,
    value: Vec<u8>,
    descs: SmallVec<[Descriptor; 2]>,
}

impl Characteristic {
    /// Returns the characteristic UUID.
    #[inline]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the properties bitmask.
    #[inline]
    #[must_use]
    pub const fn properties(&self) -> Prop {
        self.props
    }

    /// Returns the permissions bitmask.
    #[inline]
    #[must_use]
    pub const fn permissions(&self) -> Perm {
        self.perms
    }

    /// Returns the current value.
    #[inline]
    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Replaces the current value.
    #[inline]
    pub(super) fn set_value(&mut self, v: &[u8]) {
        self.value.clear();
        self.value.extend_from_slice(v);
    }

    /// Returns the declared descriptors in declaration order.
    #[inline]
    #[must_use]
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descs
    }

    /// Returns the descriptor with the specified UUID.
    pub fn descriptor(&self, uuid: Uuid) -> Option<&Descriptor> {
        self.descs.iter().find(|d| d.uuid == uuid)
    }
}

/// A declared descriptor.
#[derive(Clone, Debug)]
pub struct Descriptor {
    uuid: Uuid,
    perms: Perm,
    value: Vec<u8>,
}

impl Descriptor {
    /// Returns a default Client Characteristic Configuration descriptor with
    /// notifications disabled.
    fn client_cfg() -> Self {
        Self {
            uuid: CLIENT_CHARACTERISTIC_CONFIGURATION.as_uuid(),
            perms: Perm::READ | Perm::WRITE,
            value: DISABLE_NOTIFICATION_VALUE.to_vec(),
        }
    }

    /// Returns the descriptor UUID.
    #[inline]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the permissions bitmask.
    #[inline]
    #[must_use]
    pub const fn permissions(&self) -> Perm {
        self.perms
    }

    /// Returns the declared value.
    #[inline]
    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}
