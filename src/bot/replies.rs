//! User-facing texts, keyboards and price formatting.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use crate::channels::{InlineButton, Keyboard};
use crate::rating::{RatingRecord, RatingStats, stars};

pub const MENU_SINGLE: &str = "Single item prediction 🚗";
pub const MENU_BATCH: &str = "Batch prediction 🛻🚚";
pub const MENU_RATING: &str = "Rating 📊";
pub const MENU_HELP: &str = "Help 🆘";
pub const MENU_INFO: &str = "Info ℹ️";

pub const WELCOME: &str = "Welcome to Car Price Prediction Bot!\n\n\
    You can control me simply using keys below:";

pub const HELP_COMMAND: &str = "🤖 **Car Price Prediction Bot Help**\n\n\
    This bot is designed to predict car prices based on various parameters. \
    Here are some commands you can use:\n\n\
    /start - show welcome message and menu and restart bot\n\
    /help - show help message and list of commands\n\n\
    You can control me simply using keys below:\n\n\
    Single item prediction - Initiate the car price prediction process.\n\
    Batch prediction - Initiate the car prices prediction process for batch of objects.\n\
    Rating - View statistics including the average rating and usage statistics.\n\
    Info - Get information about the bot.\n\
    Help - Display this help message.\n\n\
    If you have any questions or feedback, feel free to contact the developer @tealandr";

pub const HELP_MENU: &str = "🤖 **Car Price Prediction Bot Help**\n\n\
    This bot is designed to predict car prices based on various parameters. \
    Here are some commands you can use:\n\n\
    /start - show welcome message and menu and restart bot\n\
    /help - show help message and list of commands\n\n\
    You can control me simply using keys below:\n\n\
    Single item prediction - Initiate the car price prediction process. \
    After price prediction, you will be prompted to leave a review\n\
    Batch prediction - Initiate the car prices prediction process for batch of objects.\n\
    Rating - View statistics including the average rating and usage statistics.\n\
    Info - Get information about the bot.\n\
    Help - Display this help message.\n\n\
    After price prediction, you will be prompted to leave a review\n\
    If you have any questions or feedback, feel free to contact the developer @tealandr";

pub const UNKNOWN: &str = "Unknown command or message\n\
    Available commands:\n\
    /start - show welcome message and menu and restart bot\n\
    /help - show help message and list of commands\n\n\
    You can control me simply using keys below";

pub const GATHERED: &str = "All data gathered. Please wait for the prediction... ⏳";
pub const RATE_PROMPT: &str = "Please, rate this Bot 🌝";
pub const RESTART_HINT: &str = "Consider restart bot using /start command";
pub const ATTACH_CSV: &str = "Please attach .csv file with car entities";
pub const BATCH_RESULT_NAME: &str = "result.csv";

pub const REVIEW_REGISTERED: &str = "Your review is registered ✨\nThanks for using this Bot!";
pub const REVIEW_FAILED: &str = "Sorry, your review could not be saved right now. Please try again later.";
pub const STATS_UNAVAILABLE: &str = "Statistics are temporarily unavailable. Please try again later.";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The main menu reply keyboard.
pub fn menu_keyboard() -> Keyboard {
    Keyboard::Reply(vec![
        vec![MENU_SINGLE.to_string(), MENU_BATCH.to_string()],
        vec![MENU_RATING.to_string()],
        vec![MENU_HELP.to_string(), MENU_INFO.to_string()],
    ])
}

/// One to five stars, three buttons per row.
pub fn rating_keyboard() -> Keyboard {
    let buttons: Vec<InlineButton> = (1..=5u8)
        .map(|i| InlineButton {
            text: stars(i),
            data: i.to_string(),
        })
        .collect();
    Keyboard::Inline(buttons.chunks(3).map(<[InlineButton]>::to_vec).collect())
}

pub fn info_text(started_at: &DateTime<Utc>) -> String {
    format!(
        "🤖 **Car Price prediction Bot**\n\n\
         This bot designed for ML model inference as part of the Homework Project \
         for the Applied Python course in Higher School of Economics\n\n\
         🚀 **Bot started at:** {} UTC\n\n\
         For detailed instructions and to access the source code, check the [GitHub repository]\
         (https://github.com/alexander-tereshin/car_price_prediction_tg_bot).\n\n\
         If you have any questions or feedback, feel free to contact the developer @tealandr",
        started_at.format("%Y-%m-%d %H:%M")
    )
}

/// Statistics message (HTML).
pub fn stats_text(stats: &RatingStats) -> String {
    let average = stats
        .average
        .map(|a| format!("{a:.2}"))
        .unwrap_or_else(|| "no ratings yet".to_string());
    let last = stats
        .last_review
        .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| "never".to_string());

    format!(
        "📊 <b>Statistics</b>\n\n\
         ⭐ <b>Average Rating:</b> {average} \n\
         📈 <b>Number of Reviews:</b> {} \n\
         ⏰ <b>Last Review:</b> {last} \n",
        stats.reviews
    )
}

/// Alert shown when a user tries to rate a second time.
pub fn already_rated_text(existing: &RatingRecord) -> String {
    format!(
        "You have already rated this Bot at {}\n\nYour last review was {}",
        existing.timestamp.format(TIMESTAMP_FORMAT),
        existing.stars()
    )
}

pub fn price_text(formatted: &str) -> String {
    format!("Predicted price is <b>{formatted}</b> RUB")
}

/// Round a predicted price to two decimals, floor it at `min_price`, and
/// group thousands with spaces.
///
/// Unfloored prices keep at least one decimal (`1 234 567.0`); a floored
/// price is shown as the configured minimum. Returns `None` for non-finite
/// input.
pub fn format_price(price: f64, min_price: Decimal) -> Option<String> {
    let rounded = Decimal::from_f64(price)?.round_dp(2).normalize();

    let text = if rounded < min_price {
        min_price.normalize().to_string()
    } else if rounded.scale() == 0 {
        format!("{rounded}.0")
    } else {
        rounded.to_string()
    };

    Some(group_thousands(&text))
}

fn group_thousands(number: &str) -> String {
    let (sign, unsigned) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, ch) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }

    match fraction {
        Some(f) => format!("{sign}{grouped}.{f}"),
        None => format!("{sign}{grouped}"),
    }
}
