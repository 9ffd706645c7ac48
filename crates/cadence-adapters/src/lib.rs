//! cadence-adapters: implementaciones concretas de los puertos del motor y
//! almacenamiento simple propiedad del llamador.
//!
//! - `delivery`: puertos de entrega (mock de desarrollo + dobles de test).
//! - `registry`: registro de cadencias y directorio de inscripciones,
//!   colaboradores externos sin lógica (key-value puro). El motor nunca los
//!   consulta; los usa el llamador para resolver secuencias y contabilidad.

pub mod delivery;
pub mod registry;

pub use delivery::{FlakyDeliveryPort, MockDeliveryPort, RecordedSend, RecordingDeliveryPort};
pub use registry::{CadenceRegistry, EnrollmentDirectory, InMemoryCadenceRegistry, InMemoryEnrollmentDirectory};
