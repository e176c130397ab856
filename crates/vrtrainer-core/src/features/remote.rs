use super::{Cx, FeatureKind, Input};
use crate::action::{DeviceCommand, ProposedAction};

pub const MENU_SHOCK_PARAM: &str = "Trainer/Menu/Shock";
pub const MENU_VIBRATE_PARAM: &str = "Trainer/Menu/Vibrate";

/// Direct trainer control: a `shock`/`vibrate`/`beep` command, or the trainer
/// flipping the matching avatar menu toggle on.
#[derive(Debug, Default)]
pub struct RemoteFeature;

impl RemoteFeature {
    pub(crate) fn evaluate(&mut self, input: Input<'_>, cx: &Cx<'_>) -> Vec<ProposedAction> {
        let command = match input {
            Input::Command(cmd) => match cmd.name.as_str() {
                "shock" => DeviceCommand::Shock,
                "vibrate" => DeviceCommand::Vibrate,
                "beep" => DeviceCommand::Beep,
                _ => return Vec::new(),
            },
            Input::Telemetry {
                parameter,
                value,
                previous,
            } => {
                let rising = value.as_bool() && !previous.is_some_and(|p| p.as_bool());
                match parameter {
                    MENU_SHOCK_PARAM if rising => DeviceCommand::Shock,
                    MENU_VIBRATE_PARAM if rising => DeviceCommand::Vibrate,
                    _ => return Vec::new(),
                }
            }
            Input::Speech { .. } => return Vec::new(),
        };
        vec![cx.single(FeatureKind::Remote, command, command.to_string())]
    }
}
