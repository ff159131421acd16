//! Per-frame render statistics
//!
//! Counters accumulate across every scene rendered between two
//! [`Renderer3D::flush`](crate::Renderer3D::flush) calls.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderStats {
    // === Scenes ===
    /// `end_scene` calls, including pick scenes
    pub scene_count: u32,

    // === Draws ===
    /// Indexed draws issued in main, pick and shadow passes
    pub draw_count: u32,

    /// Submodels skipped for lacking a program for the active pass
    pub skipped_draws: u32,

    // === Targets ===
    /// Full clears of camera destinations; post-processing scratch is not counted
    pub clear_count: u32,

    /// Shadow maps rendered
    pub shadow_passes: u32,

    // === Post-processing ===
    /// Stage executions across all cameras
    pub post_process_stages: u32,
}

impl RenderStats {
    /// Fold another frame's counters into this one
    pub fn accumulate(&mut self, other: &RenderStats) {
        self.scene_count += other.scene_count;
        self.draw_count += other.draw_count;
        self.skipped_draws += other.skipped_draws;
        self.clear_count += other.clear_count;
        self.shadow_passes += other.shadow_passes;
        self.post_process_stages += other.post_process_stages;
    }
}
