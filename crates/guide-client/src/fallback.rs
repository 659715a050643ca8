//! Deterministic, keyword-driven answers used when the model is unavailable.

struct CannedAnswer {
    keywords: &'static [&'static str],
    guidance: &'static str,
}

const WHATSAPP: &[CannedAnswer] = &[
    CannedAnswer {
        keywords: &["photo", "picture", "image", "camera"],
        guidance: "To send a photo in WhatsApp:\n1. Open the chat with the person.\n2. Tap the paperclip or camera icon next to the message box.\n3. Choose Gallery to pick a photo, or Camera to take a new one.\n4. Tap the green send arrow.",
    },
    CannedAnswer {
        keywords: &["profile"],
        guidance: "To change your WhatsApp profile picture:\n1. Tap the three dots at the top right and choose Settings.\n2. Tap your name at the top.\n3. Tap the camera icon on your picture.\n4. Choose a photo and tap Done.",
    },
    CannedAnswer {
        keywords: &["call", "video"],
        guidance: "To call someone in WhatsApp:\n1. Open the chat with the person.\n2. Tap the phone icon at the top for a voice call, or the camera icon for a video call.",
    },
    CannedAnswer {
        keywords: &["message", "send", "write", "text", "reply"],
        guidance: "To send a message in WhatsApp:\n1. Tap the chat with the person.\n2. Tap the message box at the bottom.\n3. Type your message.\n4. Tap the green send arrow.",
    },
];

const PHONE: &[CannedAnswer] = &[
    CannedAnswer {
        keywords: &["contact", "save", "add"],
        guidance: "To save a new contact:\n1. Open the Contacts tab.\n2. Tap the plus button.\n3. Type the name and phone number.\n4. Tap Save.",
    },
    CannedAnswer {
        keywords: &["missed", "recent", "history"],
        guidance: "To see your recent calls, tap the Recents tab at the bottom of the Phone app. Missed calls are shown in red.",
    },
    CannedAnswer {
        keywords: &["call", "dial", "ring", "number"],
        guidance: "To make a call:\n1. Tap the keypad icon.\n2. Type the phone number.\n3. Tap the green call button.",
    },
];

const SETTINGS: &[CannedAnswer] = &[
    CannedAnswer {
        keywords: &["wifi", "wi-fi", "internet", "network"],
        guidance: "To connect to Wi-Fi:\n1. Tap Wi-Fi.\n2. Make sure the switch is turned on.\n3. Tap the name of your network.\n4. Type the password and tap Connect.",
    },
    CannedAnswer {
        keywords: &["bright", "dark", "screen"],
        guidance: "To change the screen brightness:\n1. Tap Display.\n2. Slide the Brightness bar to the right to make it brighter, or left to make it darker.",
    },
    CannedAnswer {
        keywords: &["font", "text size", "bigger", "larger", "read"],
        guidance: "To make text bigger:\n1. Tap Display.\n2. Tap Font size.\n3. Slide the bar to the right until the text is comfortable to read.",
    },
    CannedAnswer {
        keywords: &["volume", "sound", "loud", "ring"],
        guidance: "To change the volume:\n1. Tap Sound.\n2. Slide the Ring volume bar to the right to make it louder.",
    },
];

const GENERAL: &[CannedAnswer] = &[
    CannedAnswer {
        keywords: &["home", "back", "lost", "exit"],
        guidance: "To get back to the home screen, tap the home button at the bottom of the screen. You can always start again from there.",
    },
    CannedAnswer {
        keywords: &["open", "app", "find"],
        guidance: "To open an app, go to the home screen and tap the app's picture once. If you cannot see it, swipe up to see all your apps.",
    },
];

fn answers_for(context: &str) -> &'static [CannedAnswer] {
    match context.to_lowercase().as_str() {
        "whatsapp" | "messages" | "messenger" => WHATSAPP,
        "phone" | "dialer" | "contacts" => PHONE,
        "settings" => SETTINGS,
        _ => GENERAL,
    }
}

fn context_fallback(context: &str) -> String {
    let label = match context.to_lowercase().as_str() {
        "whatsapp" | "messages" | "messenger" => "WhatsApp",
        "phone" | "dialer" | "contacts" => "Phone",
        "settings" => "Settings",
        _ => "your phone",
    };
    format!(
        "I'm having trouble connecting right now, but I can still help with {}. Try asking about one thing at a time, for example how to send a message, make a call, or change a setting.",
        label
    )
}

/// Canned guidance for `query` in `context`. Pure: same input, same answer.
pub fn fallback_guidance(context: &str, query: &str) -> String {
    let query = query.to_lowercase();

    answers_for(context)
        .iter()
        .chain(GENERAL.iter())
        .find(|answer| answer.keywords.iter().any(|k| query.contains(k)))
        .map(|answer| answer.guidance.to_string())
        .unwrap_or_else(|| context_fallback(context))
}
