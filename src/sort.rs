use std::sync::Arc;

use tracing::debug;

use crate::config::{HsConfig, KeyWidth, Specialization, TargetProfile};
use crate::device::{Device, HostDevice};
use crate::error::{HsError, Result};
use crate::key::Key;
use crate::network::Topology;
use crate::plan::{Plan, SortOptions};

/// A sorter specialized for one configuration. Cloning shares the topology.
#[derive(Clone, Debug)]
pub struct HotSort {
    topology: Arc<Topology>,
}

impl HotSort {
    pub fn new(config: HsConfig) -> Result<Self> {
        Self::with_target(config, TargetProfile::HOST)
    }

    pub fn with_target(config: HsConfig, target: TargetProfile) -> Result<Self> {
        let spec = Specialization::new(config, target)?;
        Ok(Self {
            topology: Arc::new(Topology::new(spec)),
        })
    }

    pub fn spec(&self) -> &Specialization {
        &self.topology.spec
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Buffer length needed to sort `count` keys.
    pub fn padded_len(&self, count: usize) -> usize {
        self.spec().padded_len(count)
    }

    pub fn plan(&self, count: usize, options: SortOptions) -> Plan {
        Plan::new(self.spec(), count, options)
    }

    pub fn host_device(&self) -> HostDevice {
        HostDevice::new(self.topology.clone())
    }

    /// Sorts the first `count` keys of `keys` on the host device.
    ///
    /// `keys` must hold at least [`HotSort::padded_len`] keys, the padding past `count` is overwritten.
    pub fn sort<K: Key>(&self, keys: &mut [K], count: usize, options: SortOptions) -> Result<()> {
        let mut device = self.host_device();
        self.sort_on(&mut device, keys, count, options)
    }

    /// Sorts the first `count` keys of `keys` by issuing the plan's launches to `device`.
    pub fn sort_on<K: Key, D: Device<K>>(
        &self,
        device: &mut D,
        keys: &mut [K],
        count: usize,
        options: SortOptions,
    ) -> Result<()> {
        let spec = self.spec();
        let expected = spec.config.key_width.bits();
        if K::WIDTH != expected {
            return Err(HsError::KeyWidthMismatch {
                expected,
                found: K::WIDTH,
            });
        }
        if count > spec.max_keys() {
            return Err(HsError::CountTooLarge {
                count,
                max: spec.max_keys(),
            });
        }
        let padded = self.padded_len(count);
        if keys.len() < padded {
            return Err(HsError::BufferTooSmall {
                len: keys.len(),
                required: padded,
            });
        }
        if count == 0 {
            return Ok(());
        }

        let keys = &mut keys[..padded];
        keys[count..].fill(options.direction.sentinel());

        let plan = self.plan(count, options);
        debug!(
            count,
            slabs = plan.slabs,
            launches = plan.launches().len(),
            direction = ?options.direction,
            "sorting"
        );
        for launch in plan.launches() {
            device.launch(launch, keys)?;
        }
        Ok(())
    }
}

/// Sorts a copy of `values` in ascending order with the default configuration for the key width.
pub fn sort_slice_hotsort<K: Key>(values: &[K]) -> Result<Vec<K>> {
    let sorter = HotSort::new(HsConfig::default().with_key_width(KeyWidth::of::<K>()))?;
    let mut keys = values.to_vec();
    keys.resize(sorter.padded_len(values.len()), K::MAX);
    sorter.sort(&mut keys, values.len(), SortOptions::default())?;
    keys.truncate(values.len());
    Ok(keys)
}
