mod api;

pub use api::{DevStatusResponse, HealthResponse, ProfileResponse, SeedAccepted, SeedRequest};
