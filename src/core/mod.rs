// ─── Launcher Engine Core ───
// Task graph execution for launcher work: downloads, caching, installers.
//
// Architecture:
//   core/
//     task/       — Task graph, result channels, progress aggregation
//     scheduler/  — Bounded execution pool + graph driver
//     downloader/ — Multi-candidate verified downloads
//     cache/      — Content-addressed artifact cache
//     maven/      — Coordinates and repository URLs
//     loaders/    — Forge, NeoForge, Fabric, Quilt install chains
//     state/      — Settings + shared engine context

pub mod cache;
pub mod downloader;
pub mod error;
pub mod http;
pub mod loaders;
pub mod maven;
pub mod scheduler;
pub mod state;
pub mod task;
