pub const SUCCESS: i32 = 0;
/// Generation started but a data source or the writer failed
pub const EXECUTION_ERROR: i32 = 1;
/// Missing data root or unusable arguments
pub const INPUT_ERROR: i32 = 2;
/// Invalid dataset configuration or subject selection
pub const CONFIG_ERROR: i32 = 3;
