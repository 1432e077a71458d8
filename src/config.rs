mod loader;

pub use loader::{
    AcquisitionSection, CameraSection, Config, OutputSection, SimulationSection, TimingSection,
    DEFAULT_CONFIG_PATH,
};
