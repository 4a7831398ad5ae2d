pub mod geofence;
pub mod location;
