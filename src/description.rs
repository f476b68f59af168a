use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};

use crate::models::{ActionType, Notification, ParentType};

/// User-facing sentence for a notification, e.g.
/// "On Friday 25 March, your detail (10:00 - 11:00) has been added as CCTV monitoring."
///
/// The wording is shown verbatim in the notification list, so changes here
/// are visible to every client.
pub fn describe(notification: &Notification) -> String {
    let activity = notification.activity.as_deref();
    format!(
        "On {}, your {} {}has {}{}.",
        format_day(notification.shift_modified.date()),
        notification_kind(notification.parent_type, activity),
        time_range(notification.detail_start, notification.detail_end, activity),
        notification.action_type.description(),
        activity_suffix(notification.action_type, activity),
    )
}

// "Friday 25 March"
pub fn format_day(date: NaiveDate) -> String {
    date.format("%A %-d %B").to_string()
}

// "Friday, 25th March", used for summary titles
pub fn format_day_with_ordinal(date: NaiveDate) -> String {
    let day = date.day();
    let ordinal = if (11..=13).contains(&day) {
        "th"
    } else {
        match day % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    };
    format!("{}, {}{} {}", date.format("%A"), day, ordinal, date.format("%B"))
}

fn notification_kind(parent_type: ParentType, activity: Option<&str>) -> &'static str {
    match (parent_type, activity) {
        (ParentType::Shift, None) => "shift",
        (ParentType::Shift, Some(_)) => "detail",
        (ParentType::Overtime, None) => "overtime shift",
        (ParentType::Overtime, Some(_)) => "overtime detail",
    }
}

fn time_range(start: NaiveDateTime, end: NaiveDateTime, activity: Option<&str>) -> String {
    if activity.is_none() {
        return String::new();
    }
    // A detail starting or ending exactly at midnight spans the whole day
    if start.time() > NaiveTime::MIN && end.time() > NaiveTime::MIN {
        format!("({} - {}) ", start.format("%H:%M"), end.format("%H:%M"))
    } else {
        "(full day) ".to_string()
    }
}

fn activity_suffix(action_type: ActionType, activity: Option<&str>) -> String {
    match activity {
        Some(activity) => match action_type {
            ActionType::Add => format!(" as {}", activity),
            ActionType::Edit => format!(" to {}", activity),
            ActionType::Delete => format!(" (was {})", activity),
        },
        None => String::new(),
    }
}
