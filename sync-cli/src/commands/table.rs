//! Print the sync-enabled state transition table.

use offgrid_sync_core::{AutostopAction, SyncInputs};

/// Run the table command.
pub fn run() {
    print!("{}", render());
}

fn render() -> String {
    let mut out = String::from("wants data  full stop  synced  ->  state    autostop\n");
    for wants_to_sync_data in [false, true] {
        for has_requested_full_stop in [false, true] {
            for is_synced in [false, true] {
                let inputs = SyncInputs {
                    wants_to_sync_data,
                    has_requested_full_stop,
                    is_synced,
                };
                let transition = inputs.evaluate();
                let autostop = match transition.autostop {
                    AutostopAction::Arm => "arm",
                    AutostopAction::Cancel => "cancel",
                };
                out.push_str(&format!(
                    "{:<10}  {:<9}  {:<6}  ->  {:<7}  {}\n",
                    yes_no(wants_to_sync_data),
                    yes_no(has_requested_full_stop),
                    yes_no(is_synced),
                    transition.state.to_string(),
                    autostop
                ));
            }
        }
    }
    out.push_str("\nOnce a full stop reaches none, sync stays none until the request is rescinded.\n");
    out
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
