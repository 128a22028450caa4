use rayon::prelude::*;

use crate::key::Key;
use crate::network::Topology;
use crate::warp::Warp;

/// Transpose kernel: rewrites every sorted slab in linear order.
///
/// Slabs without a butterfly plan are written back in rank order, the way shared memory would hand them over.
pub(crate) fn transpose<K: Key>(topology: &Topology, keys: &mut [K]) {
    let spec = &topology.spec;
    keys.par_chunks_mut(spec.slab_keys()).for_each_init(
        || Warp::new(spec.lanes, spec.rows, K::MIN),
        |warp, slab| {
            warp.load(slab);
            match &topology.transpose {
                Some(plan) => {
                    for &stage in &plan.stages {
                        warp.butterfly(stage);
                    }
                    warp.store_remapped(slab, &plan.remap);
                }
                None => warp.store_ranked(slab),
            }
        },
    );
}
