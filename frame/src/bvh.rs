//! Light BVH level planning.
//!
//! The BVH is built bottom-up over the sorted lights, one dispatch per
//! level. Each level reduces groups of `subgroup_size` elements to one node,
//! so the host knows every level's size without reading GPU memory back:
//!
//! ```text
//! level 0: L lights        -> ceil(L / sg) nodes
//! level n: previous nodes  -> ceil(prev / sg) nodes
//! ```
//!
//! Levels are emitted until a level's element count fits in one sub-group.

use crate::light::LightRecord;

/// One BVH reduction level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BvhLevel {
    /// Elements read by the level (lights for level 0, nodes otherwise).
    pub element_count: u32,
    /// First element read, in lights (level 0) or nodes.
    pub input_offset: u32,
    /// First node written.
    pub output_offset: u32,
}

impl BvhLevel {
    /// Nodes written by the level.
    pub fn output_count(&self, subgroup_size: u32) -> u32 {
        self.element_count.div_ceil(subgroup_size)
    }

    /// Whether the level reads lights rather than nodes. Only the first
    /// level writes at node offset zero.
    pub fn is_leaf(&self) -> bool {
        self.output_offset == 0
    }
}

/// Push constants of one level dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct BvhPush {
    pub element_count: u32,
    pub input_offset: u32,
    pub output_offset: u32,
    pub subgroup_size: u32,
}

impl BvhPush {
    /// Push constants for `level`.
    pub fn new(level: &BvhLevel, subgroup_size: u32) -> Self {
        Self {
            element_count: level.element_count,
            input_offset: level.input_offset,
            output_offset: level.output_offset,
            subgroup_size,
        }
    }

    /// Level described by the push constants.
    pub fn level(&self) -> BvhLevel {
        BvhLevel {
            element_count: self.element_count,
            input_offset: self.input_offset,
            output_offset: self.output_offset,
        }
    }
}

/// Levels for `light_count` lights.
///
/// Always returns at least one level. The last level's element count is at
/// most `subgroup_size`.
///
/// # Panics
///
/// Panics if `subgroup_size < 2`, for which the reduction never shrinks.
pub fn plan_levels(light_count: u32, subgroup_size: u32) -> Vec<BvhLevel> {
    assert!(subgroup_size >= 2, "subgroup size must be at least 2");
    let mut levels = vec![BvhLevel {
        element_count: light_count,
        input_offset: 0,
        output_offset: 0,
    }];
    while let Some(&last) = levels.last()
        && last.element_count > subgroup_size
    {
        levels.push(BvhLevel {
            element_count: last.output_count(subgroup_size),
            input_offset: last.output_offset,
            output_offset: last.output_offset + last.output_count(subgroup_size),
        });
    }
    levels
}

/// Total nodes written by `levels`.
pub fn node_count(levels: &[BvhLevel], subgroup_size: u32) -> u32 {
    levels
        .last()
        .map_or(0, |l| l.output_offset + l.output_count(subgroup_size))
}

/// Node capacity needed for up to `max_lights` lights.
pub fn max_nodes(max_lights: u32, subgroup_size: u32) -> u32 {
    node_count(&plan_levels(max_lights, subgroup_size), subgroup_size).max(1)
}

/// Bounds of a BVH node, in the layout the culling shader reads.
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct BvhNode {
    pub min: [f32; 3],
    pub _pad0: f32,
    pub max: [f32; 3],
    pub _pad1: f32,
}

static_assertions::assert_eq_size!(BvhNode, [u8; 32]);

impl BvhNode {
    /// Size of one node in bytes.
    pub const SIZE: u64 = std::mem::size_of::<BvhNode>() as u64;

    fn empty() -> Self {
        Self {
            min: [f32::MAX; 3],
            max: [f32::MIN; 3],
            ..Default::default()
        }
    }

    fn grow(&mut self, min: [f32; 3], max: [f32; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(min[axis]);
            self.max[axis] = self.max[axis].max(max[axis]);
        }
    }

    /// Whether a light's sphere lies inside the node.
    pub fn contains(&self, light: &LightRecord) -> bool {
        (0..3).all(|axis| {
            light.position[axis] - light.radius >= self.min[axis]
                && light.position[axis] + light.radius <= self.max[axis]
        })
    }
}

/// Reduce one level on the CPU, as its dispatch does.
///
/// `nodes` must hold every node the level writes.
pub fn build_level(
    sorted: &[LightRecord],
    nodes: &mut [BvhNode],
    level: &BvhLevel,
    subgroup_size: u32,
) {
    let group = subgroup_size as usize;
    for out in 0..level.output_count(subgroup_size) as usize {
        let first = out * group;
        let last = (first + group).min(level.element_count as usize);
        let mut node = BvhNode::empty();
        for i in first..last {
            if level.is_leaf() {
                let light = &sorted[level.input_offset as usize + i];
                let r = light.radius;
                let p = light.position;
                node.grow([p[0] - r, p[1] - r, p[2] - r], [p[0] + r, p[1] + r, p[2] + r]);
            } else {
                let child = nodes[level.input_offset as usize + i];
                node.grow(child.min, child.max);
            }
        }
        nodes[level.output_offset as usize + out] = node;
    }
}

/// Build all nodes on the CPU, level by level.
pub fn build_nodes(sorted: &[LightRecord], levels: &[BvhLevel], subgroup_size: u32) -> Vec<BvhNode> {
    let mut nodes = vec![BvhNode::empty(); node_count(levels, subgroup_size) as usize];
    for level in levels {
        build_level(sorted, &mut nodes, level, subgroup_size);
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::MAX_LIGHTS;
    use rstest::rstest;

    #[test]
    fn test_levels_for_ten_thousand_lights() {
        let levels = plan_levels(10_000, 32);
        assert_eq!(
            levels,
            vec![
                BvhLevel {
                    element_count: 10_000,
                    input_offset: 0,
                    output_offset: 0
                },
                BvhLevel {
                    element_count: 313,
                    input_offset: 0,
                    output_offset: 313
                },
                BvhLevel {
                    element_count: 10,
                    input_offset: 313,
                    output_offset: 323
                },
            ]
        );
        assert_eq!(node_count(&levels, 32), 324);
    }

    #[test]
    fn test_zero_lights_single_empty_level() {
        let levels = plan_levels(0, 32);
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].element_count, 0);
        assert_eq!(node_count(&levels, 32), 0);
    }

    #[rstest]
    #[case(2)]
    #[case(4)]
    #[case(32)]
    #[case(64)]
    fn test_levels_terminate_for_all_counts(#[case] subgroup: u32) {
        for count in (0..=MAX_LIGHTS).step_by(97).chain([MAX_LIGHTS]) {
            let levels = plan_levels(count, subgroup);
            assert!(levels.last().unwrap().element_count <= subgroup);
            for pair in levels.windows(2) {
                assert!(pair[0].element_count > subgroup);
                assert!(pair[1].element_count < pair[0].element_count);
                assert_eq!(pair[1].input_offset, pair[0].output_offset);
            }
        }
    }

    #[test]
    fn test_root_contains_every_light() {
        let lights: Vec<_> = (0..500)
            .map(|i| LightRecord::new([i as f32, (i % 7) as f32, -(i as f32)], 0.5, [1.0; 3]))
            .collect();
        let levels = plan_levels(500, 8);
        let nodes = build_nodes(&lights, &levels, 8);
        let root = nodes.last().unwrap();
        assert!(lights.iter().all(|l| root.contains(l)));
    }

    #[test]
    fn test_max_nodes_covers_any_count() {
        let capacity = max_nodes(MAX_LIGHTS, 32);
        for count in [1, 33, 1025, MAX_LIGHTS] {
            assert!(node_count(&plan_levels(count, 32), 32) <= capacity);
        }
    }
}
