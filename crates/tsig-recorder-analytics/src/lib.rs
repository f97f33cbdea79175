pub mod clock_offset;
pub mod discriminator;
pub mod geo;
pub mod timesnap_manager;
pub mod tone_detector;
