use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Horizontal scale applied to every camera frame
    #[arg(long, default_value_t = 1.2)]
    pub fx: f64,

    /// Vertical scale applied to every camera frame
    #[arg(long, default_value_t = 1.2)]
    pub fy: f64,

    /// Replace the background behind the detected person (0 or 1)
    #[arg(long, default_value_t = 1)]
    pub segmentation: u8,

    /// Draw the facial mesh (0 or 1)
    #[arg(long, default_value_t = 1)]
    pub meshing: u8,

    /// Camera Index (default 0)
    #[arg(short, long, default_value_t = 0)]
    pub cam_index: u32,

    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    pub config: String,

    /// Show the camera image unmirrored
    #[arg(long, default_value_t = false)]
    pub no_mirror: bool,

    /// List available cameras
    #[arg(long)]
    pub list: bool,
}
