// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The closed set of envelope kinds.
//
// Every call kind pairs with exactly one `*_REPLY` kind; kinds without a
// reply are one-way notifications. The payload shape of each kind is fixed
// here and nowhere else, so encoder and decoder cannot disagree.

use strum::{Display, EnumIter, FromRepr, IntoStaticStr};

/// Static payload shape of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Shape {
    None,
    Int,
    Long,
    Float,
    Double,
    /// Up to four strings, lengths inline, bytes in one shared buffer.
    Strings,
    /// Structured multi-field value in a shared buffer.
    Record,
    /// Handle of a published 1-D/2-D measurement buffer.
    Bulk,
}

impl Shape {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr, IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum Kind {
    // one-way notifications
    Print = 1,
    Progress = 2,
    Output = 3,
    DisplayData = 4,

    // dialogs and generic I/O
    Ack = 10,
    AckReply = 11,
    ShowMessage = 12,
    ShowMessageReply = 13,
    ShowAlert = 14,
    ShowAlertReply = 15,
    ShowChoices = 16,
    ShowChoicesReply = 17,
    ShowFileSelector = 18,
    ShowFileSelectorReply = 19,
    Input = 20,
    InputReply = 21,
    Layout = 22,
    LayoutReply = 23,

    // push buttons
    ButtonCreate = 30,
    ButtonCreateReply = 31,
    ButtonDelete = 32,
    ButtonDeleteReply = 33,
    ButtonState = 34,
    ButtonStateReply = 35,
    ButtonChanged = 36,
    ButtonChangedReply = 37,

    // sliders
    SliderCreate = 40,
    SliderCreateReply = 41,
    SliderDelete = 42,
    SliderDeleteReply = 43,
    SliderState = 44,
    SliderStateReply = 45,
    SliderChanged = 46,
    SliderChangedReply = 47,

    // input fields
    InputFieldCreate = 50,
    InputFieldCreateReply = 51,
    InputFieldDelete = 52,
    InputFieldDeleteReply = 53,
    InputFieldState = 54,
    InputFieldStateReply = 55,
    InputFieldChanged = 56,
    InputFieldChangedReply = 57,

    // menus
    MenuCreate = 60,
    MenuCreateReply = 61,
    MenuDelete = 62,
    MenuDeleteReply = 63,
    MenuState = 64,
    MenuStateReply = 65,
    MenuChanged = 66,
    MenuChangedReply = 67,

    // toolbox and generic objects
    ToolboxCreate = 82,
    ToolboxCreateReply = 83,
    ToolboxDelete = 84,
    ToolboxDeleteReply = 85,
    ToolboxState = 86,
    ToolboxStateReply = 87,
    ToolboxWait = 70,
    ToolboxWaitReply = 71,
    ToolboxChanged = 72,
    ToolboxChangedReply = 73,
    ObjectDelete = 74,
    ObjectDeleteReply = 75,
    ObjectLabel = 76,
    ObjectLabelReply = 77,
    ObjectEnable = 78,
    ObjectEnableReply = 79,
    CursorPosition = 80,
    CursorPositionReply = 81,

    // display regions
    #[strum(to_string = "CURVE_1D")]
    Curve1d = 90,
    #[strum(to_string = "CURVE_1D_REPLY")]
    Curve1dReply = 91,
    #[strum(to_string = "ZOOM_1D")]
    Zoom1d = 92,
    #[strum(to_string = "ZOOM_1D_REPLY")]
    Zoom1dReply = 93,
    #[strum(to_string = "FULL_SCALE_1D")]
    FullScale1d = 94,
    #[strum(to_string = "FULL_SCALE_1D_REPLY")]
    FullScale1dReply = 95,
    #[strum(to_string = "CURVE_2D")]
    Curve2d = 96,
    #[strum(to_string = "CURVE_2D_REPLY")]
    Curve2dReply = 97,
    #[strum(to_string = "ZOOM_2D")]
    Zoom2d = 98,
    #[strum(to_string = "ZOOM_2D_REPLY")]
    Zoom2dReply = 99,
    #[strum(to_string = "FULL_SCALE_2D")]
    FullScale2d = 100,
    #[strum(to_string = "FULL_SCALE_2D_REPLY")]
    FullScale2dReply = 101,

    /// Sent in place of the paired reply when the consumer could not answer
    /// a call. Carries the call's wire code.
    FaultReply = 255,
}

impl Kind {
    /// Wire code.
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Kind> {
        Kind::from_repr(code)
    }

    /// The reply kind paired with this call kind.
    pub fn reply_kind(self) -> Option<Kind> {
        use Kind::*;
        let reply = match self {
            Ack => AckReply,
            ShowMessage => ShowMessageReply,
            ShowAlert => ShowAlertReply,
            ShowChoices => ShowChoicesReply,
            ShowFileSelector => ShowFileSelectorReply,
            Input => InputReply,
            Layout => LayoutReply,
            ButtonCreate => ButtonCreateReply,
            ButtonDelete => ButtonDeleteReply,
            ButtonState => ButtonStateReply,
            ButtonChanged => ButtonChangedReply,
            SliderCreate => SliderCreateReply,
            SliderDelete => SliderDeleteReply,
            SliderState => SliderStateReply,
            SliderChanged => SliderChangedReply,
            InputFieldCreate => InputFieldCreateReply,
            InputFieldDelete => InputFieldDeleteReply,
            InputFieldState => InputFieldStateReply,
            InputFieldChanged => InputFieldChangedReply,
            MenuCreate => MenuCreateReply,
            MenuDelete => MenuDeleteReply,
            MenuState => MenuStateReply,
            MenuChanged => MenuChangedReply,
            ToolboxCreate => ToolboxCreateReply,
            ToolboxDelete => ToolboxDeleteReply,
            ToolboxState => ToolboxStateReply,
            ToolboxWait => ToolboxWaitReply,
            ToolboxChanged => ToolboxChangedReply,
            ObjectDelete => ObjectDeleteReply,
            ObjectLabel => ObjectLabelReply,
            ObjectEnable => ObjectEnableReply,
            CursorPosition => CursorPositionReply,
            Curve1d => Curve1dReply,
            Zoom1d => Zoom1dReply,
            FullScale1d => FullScale1dReply,
            Curve2d => Curve2dReply,
            Zoom2d => Zoom2dReply,
            FullScale2d => FullScale2dReply,
            _ => return None,
        };
        Some(reply)
    }

    /// Whether this is a `*_REPLY` kind.
    pub fn is_reply(self) -> bool {
        let name: &'static str = self.into();
        name.ends_with("_REPLY")
    }

    pub fn is_call(self) -> bool {
        self.reply_kind().is_some()
    }

    pub fn is_notification(self) -> bool {
        !self.is_call() && !self.is_reply()
    }

    /// Payload shape carried by envelopes of this kind.
    pub fn shape(self) -> Shape {
        use Kind::*;
        match self {
            Print | Output => Shape::Strings,
            Progress => Shape::Float,
            DisplayData => Shape::Bulk,

            Ack | AckReply | ShowMessageReply | ShowAlertReply => Shape::None,
            ShowMessage | ShowAlert | ShowFileSelector | ShowFileSelectorReply | Input
            | InputReply => Shape::Strings,
            ShowChoices => Shape::Record,
            ShowChoicesReply => Shape::Int,
            Layout | LayoutReply => Shape::Int,

            ButtonCreate | SliderCreate | InputFieldCreate | MenuCreate => Shape::Record,
            ButtonCreateReply | SliderCreateReply | InputFieldCreateReply | MenuCreateReply => {
                Shape::Long
            }
            ButtonDelete | SliderDelete | InputFieldDelete | MenuDelete | ObjectDelete => {
                Shape::Long
            }
            ButtonDeleteReply | SliderDeleteReply | InputFieldDeleteReply | MenuDeleteReply
            | ObjectDeleteReply => Shape::Int,
            ButtonState | SliderState | InputFieldState | MenuState => Shape::Record,
            ButtonStateReply | MenuStateReply => Shape::Int,
            SliderStateReply => Shape::Double,
            InputFieldStateReply => Shape::Record,
            ButtonChanged | SliderChanged | InputFieldChanged | MenuChanged => Shape::Long,
            ButtonChangedReply | SliderChangedReply | InputFieldChangedReply
            | MenuChangedReply => Shape::Int,

            ToolboxCreate | ToolboxState | ToolboxWait | ToolboxChanged => Shape::Record,
            ToolboxCreateReply | ToolboxStateReply | ToolboxWaitReply | ToolboxChangedReply => {
                Shape::Long
            }
            ToolboxDelete => Shape::Long,
            ToolboxDeleteReply => Shape::Int,
            ObjectLabel | ObjectEnable => Shape::Record,
            ObjectLabelReply | ObjectEnableReply => Shape::Int,
            CursorPosition => Shape::Int,
            CursorPositionReply => Shape::Record,

            Curve1d | Curve2d => Shape::Int,
            Zoom1d | Zoom2d | FullScale1d | FullScale2d => Shape::Record,
            Curve1dReply | Zoom1dReply | FullScale1dReply | Curve2dReply | Zoom2dReply
            | FullScale2dReply => Shape::Int,
            FaultReply => Shape::Int,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_call_pairs_with_one_reply() {
        let mut seen = std::collections::HashSet::new();
        for kind in Kind::iter().filter(|k| k.is_call()) {
            let reply = kind.reply_kind().unwrap();
            assert!(reply.is_reply(), "{kind} pairs with non-reply {reply}");
            assert_eq!(reply.to_string(), format!("{kind}_REPLY"));
            assert!(seen.insert(reply), "{reply} paired twice");
        }
        let replies = Kind::iter()
            .filter(|k| k.is_reply() && *k != Kind::FaultReply)
            .count();
        assert_eq!(replies, seen.len());
        assert!(!seen.contains(&Kind::FaultReply));
    }

    #[test]
    fn toolbox_regions_have_a_full_quadruple() {
        for (call, shape, reply_shape) in [
            (Kind::ToolboxCreate, Shape::Record, Shape::Long),
            (Kind::ToolboxDelete, Shape::Long, Shape::Int),
            (Kind::ToolboxState, Shape::Record, Shape::Long),
            (Kind::ToolboxChanged, Shape::Record, Shape::Long),
        ] {
            assert!(call.is_call(), "{call}");
            assert_eq!(call.shape(), shape, "{call}");
            assert_eq!(call.reply_kind().map(Kind::shape), Some(reply_shape), "{call}");
        }
        assert_eq!(Kind::ToolboxDeleteReply.to_string(), "TOOLBOX_DELETE_REPLY");
    }

    #[test]
    fn shape_names_are_lowercase() {
        assert_eq!(Shape::Strings.name(), "strings");
        assert_eq!(Shape::None.to_string(), "none");
    }

    #[test]
    fn fault_reply_is_a_reply_without_a_call() {
        assert!(Kind::FaultReply.is_reply());
        assert!(!Kind::FaultReply.is_call());
        assert!(!Kind::FaultReply.is_notification());
        assert_eq!(Kind::FaultReply.shape(), Shape::Int);
    }

    #[test]
    fn notifications_have_no_reply() {
        let notes: Vec<Kind> = Kind::iter().filter(|k| k.is_notification()).collect();
        assert_eq!(
            notes,
            vec![Kind::Print, Kind::Progress, Kind::Output, Kind::DisplayData]
        );
    }

    #[test]
    fn codes_round_trip() {
        for kind in Kind::iter() {
            assert_eq!(Kind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(Kind::from_code(0), None);
        assert_eq!(Kind::from_code(5000), None);
    }

    #[test]
    fn display_names_follow_reply_convention() {
        assert_eq!(Kind::SliderStateReply.to_string(), "SLIDER_STATE_REPLY");
        assert_eq!(Kind::FullScale2d.to_string(), "FULL_SCALE_2D");
        assert!(Kind::Zoom1dReply.is_reply());
        assert!(!Kind::Zoom1d.is_reply());
    }
}
