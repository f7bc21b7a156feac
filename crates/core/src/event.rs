/// A click delivered back to the module that owns the clicked segment.
///
/// `x`/`y` are relative to the segment, `screen_x`/`screen_y` are absolute.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Event {
    /// Identifier of the clicked segment within its module.
    pub segment_id: String,
    pub button: Button,
    pub x: i32,
    pub y: i32,
    pub screen_x: i32,
    pub screen_y: i32,
    pub width: i32,
    pub height: i32,
    pub modifiers: Vec<Modifier>,
}

/// Mouse button, using X11 button numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Button {
    #[default]
    Left,
    Middle,
    Right,
    ScrollUp,
    ScrollDown,
    ScrollLeft,
    ScrollRight,
    Back,
    Forward,
    Other(u32),
}

impl Button {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Button::Left,
            2 => Button::Middle,
            3 => Button::Right,
            4 => Button::ScrollUp,
            5 => Button::ScrollDown,
            6 => Button::ScrollLeft,
            7 => Button::ScrollRight,
            8 => Button::Back,
            9 => Button::Forward,
            n => Button::Other(n),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Button::Left => 1,
            Button::Middle => 2,
            Button::Right => 3,
            Button::ScrollUp => 4,
            Button::ScrollDown => 5,
            Button::ScrollLeft => 6,
            Button::ScrollRight => 7,
            Button::Back => 8,
            Button::Forward => 9,
            Button::Other(n) => n,
        }
    }

    pub fn is_scroll(self) -> bool {
        matches!(
            self,
            Button::ScrollUp | Button::ScrollDown | Button::ScrollLeft | Button::ScrollRight
        )
    }
}

/// Keyboard modifiers held during a click, as named by the host panel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Modifier {
    Shift,
    Control,
    Lock,
    Mod1,
    Mod2,
    Mod3,
    Mod4,
    Mod5,
    Other(String),
}

impl Modifier {
    pub fn from_name(name: &str) -> Self {
        match name {
            "Shift" => Modifier::Shift,
            "Control" => Modifier::Control,
            "Lock" => Modifier::Lock,
            "Mod1" => Modifier::Mod1,
            "Mod2" => Modifier::Mod2,
            "Mod3" => Modifier::Mod3,
            "Mod4" => Modifier::Mod4,
            "Mod5" => Modifier::Mod5,
            other => Modifier::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Modifier::Shift => "Shift",
            Modifier::Control => "Control",
            Modifier::Lock => "Lock",
            Modifier::Mod1 => "Mod1",
            Modifier::Mod2 => "Mod2",
            Modifier::Mod3 => "Mod3",
            Modifier::Mod4 => "Mod4",
            Modifier::Mod5 => "Mod5",
            Modifier::Other(name) => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_codes() {
        for code in 1..=9 {
            assert_eq!(Button::from_code(code).code(), code);
        }
        assert_eq!(Button::from_code(12), Button::Other(12));
        assert!(Button::ScrollDown.is_scroll());
        assert!(!Button::Back.is_scroll());
    }

    #[test]
    fn modifier_names() {
        assert_eq!(Modifier::from_name("Mod4"), Modifier::Mod4);
        assert_eq!(Modifier::from_name("Hyper").name(), "Hyper");
    }
}
