use argh::FromArgs;
use std::path::PathBuf;

#[derive(FromArgs, Debug)]
/// Connect BLE bike trainers and heart rate straps, and log the ride
pub struct TopLevelCmd {
    /// specify config file path, creates file if it doesn't exist
    #[argh(option, short = 'c')]
    pub config_override: Option<PathBuf>,
    /// config file must exist, including "config_override" files
    #[argh(switch, short = 'r')]
    pub config_required: bool,
    /// use config file as-is (don't save over it)
    #[argh(switch, short = 'n')]
    pub no_save: bool,
    /// generate fake sensor data instead of using Bluetooth
    #[argh(switch, short = 's')]
    pub simulate: bool,
    #[argh(subcommand)]
    pub subcommands: SubCommands,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
pub enum SubCommands {
    Scan(ScanCmd),
    Ride(RideCmd),
    History(HistoryCmd),
    Summary(SummaryCmd),
}

/// list nearby fitness devices, strongest signal first
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "scan")]
pub struct ScanCmd {}

/// connect to a device and record until Ctrl-C
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "ride")]
pub struct RideCmd {
    /// address of the device to use, otherwise the saved or strongest one
    #[argh(option, short = 'a')]
    pub address: Option<String>,
}

/// list archived workouts, newest first
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "history")]
pub struct HistoryCmd {}

/// print the summary of an archived workout
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "summary")]
pub struct SummaryCmd {
    /// path to the workout file
    #[argh(positional)]
    pub path: PathBuf,
}
