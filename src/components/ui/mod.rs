pub mod alert;
pub mod button;
pub mod input;
pub mod spinner;

// Re-export so pages can `use crate::components::ui::Button` etc.
pub use alert::*;
pub use button::*;
pub use input::*;
pub use spinner::*;
