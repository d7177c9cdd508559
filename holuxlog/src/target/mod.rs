//! Supported logger families.

mod family;

pub use family::{DeviceFamily, FamilyProfile, VendorCommands};
