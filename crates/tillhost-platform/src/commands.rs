#[cfg(windows)]
use std::os::windows::process::CommandExt;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Keeps spawned helper processes (database clients, installers, the backend
/// itself) from flashing a console window on Windows.
pub trait HideWindow {
    fn hide_window(&mut self) -> &mut Self;
}

impl HideWindow for tokio::process::Command {
    #[cfg(windows)]
    fn hide_window(&mut self) -> &mut Self {
        self.creation_flags(CREATE_NO_WINDOW)
    }

    #[cfg(not(windows))]
    fn hide_window(&mut self) -> &mut Self {
        self
    }
}

impl HideWindow for std::process::Command {
    #[cfg(windows)]
    fn hide_window(&mut self) -> &mut Self {
        self.creation_flags(CREATE_NO_WINDOW)
    }

    #[cfg(not(windows))]
    fn hide_window(&mut self) -> &mut Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::HideWindow;

    #[test]
    fn hide_window_is_chainable_on_both_command_types() {
        let mut std_cmd = std::process::Command::new("true");
        let before = &mut std_cmd as *mut std::process::Command;
        assert_eq!(before, std_cmd.hide_window() as *mut _);

        let mut tokio_cmd = tokio::process::Command::new("true");
        let before = &mut tokio_cmd as *mut tokio::process::Command;
        assert_eq!(before, tokio_cmd.hide_window() as *mut _);
    }
}
