//! # Request Generator
//!
//! A segment boundary is any frame index that is a multiple of
//! `frames_per_segment`. At a boundary the generator splits the tile set
//! into the frame's FOV tiles and their complement, drops tiles already held
//! locally at the chosen bitrate, and emits FOV tiles first as HIGH followed
//! by the rest as LOW.

use panocast_common::{
    Priority, RequestScope, SegmentId, TileId, TileKey, TileRequest, TileStore, VideoConfig,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPlan {
    pub segment: SegmentId,
    pub bitrate_kbps: u32,
    /// HIGH requests in FOV order, then LOW requests in ascending tile order.
    pub requests: Vec<TileRequest>,
    /// Tiles not requested because the store already holds them.
    pub already_held: Vec<TileId>,
}

impl RequestPlan {
    pub fn tiles(&self, priority: Priority) -> Vec<TileId> {
        self.requests
            .iter()
            .filter(|r| r.priority == priority)
            .map(|r| r.tile)
            .collect()
    }

    /// Tiles the segment's QoE accounting considers eligible: requested or
    /// already held.
    pub fn eligible(&self) -> impl Iterator<Item = TileId> + '_ {
        self.requests
            .iter()
            .map(|r| r.tile)
            .chain(self.already_held.iter().copied())
    }
}

#[derive(Debug, Clone)]
pub struct RequestGenerator {
    video: VideoConfig,
    scope: RequestScope,
}

impl RequestGenerator {
    pub fn new(video: &VideoConfig, scope: RequestScope) -> Self {
        Self {
            video: video.clone(),
            scope,
        }
    }

    pub fn is_boundary(&self, frame: u64) -> bool {
        frame % u64::from(self.video.frames_per_segment) == 0
    }

    /// Segment that `frame` plays out in. Segments start at 1.
    pub fn segment_of(&self, frame: u64) -> SegmentId {
        (frame / u64::from(self.video.frames_per_segment)) as SegmentId + 1
    }

    pub fn plan(
        &self,
        segment: SegmentId,
        bitrate_kbps: u32,
        fov: &[TileId],
        store: &dyn TileStore,
    ) -> RequestPlan {
        let tile_count = usize::from(self.video.tile_count);
        let mut in_fov = vec![false; tile_count + 1];
        let mut plan = RequestPlan {
            segment,
            bitrate_kbps,
            requests: Vec::with_capacity(tile_count),
            already_held: Vec::new(),
        };

        let consider = |tile: TileId, priority: Priority, plan: &mut RequestPlan| {
            if store.exists(&TileKey::new(segment, tile, bitrate_kbps)) {
                plan.already_held.push(tile);
            } else {
                plan.requests
                    .push(TileRequest::new(segment, tile, priority, bitrate_kbps));
            }
        };

        for &tile in fov {
            let slot = usize::from(tile);
            if tile == 0 || slot > tile_count || in_fov[slot] {
                continue;
            }
            in_fov[slot] = true;
            consider(tile, Priority::High, &mut plan);
        }

        if self.scope == RequestScope::All {
            for tile in self.video.tiles() {
                if !in_fov[usize::from(tile)] {
                    consider(tile, Priority::Low, &mut plan);
                }
            }
        }

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use panocast_common::MemoryTileStore;

    fn video(tile_count: u16) -> VideoConfig {
        VideoConfig {
            fps: 30,
            frames_per_segment: 30,
            segments: 6,
            tile_count,
        }
    }

    #[test]
    fn boundaries_and_segment_numbers() {
        let generator = RequestGenerator::new(&video(4), RequestScope::All);
        assert!(generator.is_boundary(0));
        assert!(!generator.is_boundary(29));
        assert!(generator.is_boundary(30));
        assert_eq!(generator.segment_of(0), 1);
        assert_eq!(generator.segment_of(29), 1);
        assert_eq!(generator.segment_of(30), 2);
    }

    #[test]
    fn fov_first_high_then_rest_low() {
        let generator = RequestGenerator::new(&video(4), RequestScope::All);
        let store = MemoryTileStore::new();
        let plan = generator.plan(1, 3000, &[2, 1], &store);

        let order: Vec<_> = plan.requests.iter().map(|r| (r.tile, r.priority)).collect();
        assert_eq!(
            order,
            vec![
                (2, Priority::High),
                (1, Priority::High),
                (3, Priority::Low),
                (4, Priority::Low),
            ]
        );
        assert!(plan.requests.iter().all(|r| r.bitrate_kbps == 3000 && r.segment == 1));
    }

    #[test]
    fn skips_held_tiles_and_duplicate_fov_entries() {
        let generator = RequestGenerator::new(&video(4), RequestScope::All);
        let store = MemoryTileStore::new();
        store.put(TileKey::new(2, 1, 3500), Bytes::from_static(b"x")).unwrap();
        store.put(TileKey::new(2, 3, 3000), Bytes::from_static(b"y")).unwrap();

        let plan = generator.plan(2, 3500, &[1, 2, 2], &store);
        assert_eq!(plan.tiles(Priority::High), vec![2]);
        assert_eq!(plan.tiles(Priority::Low), vec![3, 4]);
        assert_eq!(plan.already_held, vec![1]);

        let mut eligible: Vec<_> = plan.eligible().collect();
        eligible.sort();
        assert_eq!(eligible, vec![1, 2, 3, 4]);
    }

    #[test]
    fn fov_only_scope_skips_low_requests() {
        let generator = RequestGenerator::new(&video(8), RequestScope::FovOnly);
        let plan = generator.plan(1, 3000, &[5, 6], &MemoryTileStore::new());
        assert_eq!(plan.tiles(Priority::High), vec![5, 6]);
        assert!(plan.tiles(Priority::Low).is_empty());
    }
}
