//! motor-registry: known motor models, protection limits and robot definitions

mod error;
pub use error::{RegistryError, Result};

mod types;
pub use types::{Brand, FirmwareVersion, LimitKind, MitRanges, ModelInfo, UnitScales};

mod id;
pub use id::MotorId;

mod protection;
pub use protection::{
    effective_protection, OverrideProvider, OverrideTable, ProtectionOverrides, ProtectionParams,
};

mod table;

mod registry;
pub use registry::ModelRegistry;

mod robot;
pub use robot::{BusType, MotorBusDefinition, MotorDefinition, RobotConnection, RobotDefinition};

mod loader;
pub use loader::{
    load_models_file, load_overrides_file, load_robot_file, load_robots_dir, RobotCatalog,
};
