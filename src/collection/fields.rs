//! The field table: the fixed, ordered chain of questions asked during a
//! single-item prediction.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Brands the model was trained on, sorted the way they are numbered in the
/// brand prompt.
pub const BRANDS: [&str; 30] = [
    "Ambassador",
    "Audi",
    "BMW",
    "Chevrolet",
    "Daewoo",
    "Datsun",
    "Fiat",
    "Force",
    "Ford",
    "Honda",
    "Hyundai",
    "Isuzu",
    "Jaguar",
    "Jeep",
    "Kia",
    "Land",
    "Lexus",
    "MG",
    "Mahindra",
    "Maruti",
    "Mercedes-Benz",
    "Mitsubishi",
    "Nissan",
    "Peugeot",
    "Renault",
    "Skoda",
    "Tata",
    "Toyota",
    "Volkswagen",
    "Volvo",
];

pub const FUELS: [&str; 4] = ["Diesel", "Petrol", "LPG", "CNG"];

pub const SELLER_TYPES: [&str; 3] = ["Individual", "Dealer", "Trustmark Dealer"];

pub const TRANSMISSIONS: [&str; 2] = ["Manual", "Automatic"];

pub const OWNERS: [&str; 5] = [
    "First Owner",
    "Second Owner",
    "Third Owner",
    "Fourth & Above Owner",
    "Test Drive Car",
];

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(19|20)[0-9]{2}$").expect("year pattern is valid"));

static SIX_DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{1,6}$").expect("integer pattern is valid"));

static MILEAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{1,2}([,.][0-9]{1,5})?$").expect("mileage pattern is valid"));

static MAX_POWER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{1,3}([,.][0-9]{1,5})?$").expect("power pattern is valid"));

static SEATS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([1-9]|1[0-9]|20)$").expect("seats pattern is valid"));

/// Keys of the collected fields.
///
/// Declared in chain order, so `Ord` on keys is chain order. Serialized names
/// are the keys the prediction service expects.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    Name,
    Year,
    KmDriven,
    Fuel,
    SellerType,
    Transmission,
    Owner,
    Mileage,
    Engine,
    MaxPower,
    Seats,
}

impl FieldKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Year => "year",
            Self::KmDriven => "km_driven",
            Self::Fuel => "fuel",
            Self::SellerType => "seller_type",
            Self::Transmission => "transmission",
            Self::Owner => "owner",
            Self::Mileage => "mileage",
            Self::Engine => "engine",
            Self::MaxPower => "max_power",
            Self::Seats => "seats",
        }
    }
}

impl std::fmt::Display for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a field is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    ChoiceSet,
    Regex,
}

/// The acceptance rule of a field.
#[derive(Debug, Clone)]
pub enum Rule {
    /// A 1-based index into the choice list; resolves to the chosen entry.
    Index(&'static [&'static str]),
    /// Exact, case-sensitive membership in the choice list.
    Member(&'static [&'static str]),
    /// Full-string pattern match.
    Pattern(&'static LazyLock<Regex>),
}

impl Rule {
    /// Validate `raw` and return the value to store, or `None` on rejection.
    ///
    /// No trimming or case folding happens here.
    pub fn resolve(&self, raw: &str) -> Option<String> {
        match self {
            Self::Index(choices) => {
                // "01" or "+1" parse as integers but are not valid indexes.
                let index: usize = raw.parse().ok()?;
                if index.to_string() != raw || index == 0 {
                    return None;
                }
                choices.get(index - 1).map(|c| (*c).to_string())
            }
            Self::Member(choices) => choices
                .iter()
                .any(|c| *c == raw)
                .then(|| raw.to_string()),
            Self::Pattern(re) => re.is_match(raw).then(|| raw.to_string()),
        }
    }
}

/// Where a field's success transition leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Field(usize),
    Terminal,
}

/// The text shown when asking for a field, plus any fixed reply options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    /// Reply-keyboard options; `None` means the keyboard is removed.
    pub choices: Option<&'static [&'static str]>,
}

/// Static description of one field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub key: FieldKey,
    pub kind: FieldKind,
    pub rule: Rule,
    pub prompt: Prompt,
    /// One-line correction notice prepended to the prompt on rejection.
    pub notice: &'static str,
    pub next: Next,
}

impl FieldSpec {
    /// Render the re-prompt shown after a rejected answer.
    pub fn reprompt_text(&self) -> String {
        format!("{}\n\n{}", self.notice, self.prompt.text)
    }
}

/// The ordered field chain. Built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct FieldTable {
    fields: Vec<FieldSpec>,
}

impl FieldTable {
    /// The car attribute chain, brand through seats.
    pub fn car_attributes() -> Self {
        let brand_list = BRANDS
            .iter()
            .enumerate()
            .map(|(i, b)| format!("{}. {b}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");

        let entries: Vec<(FieldKey, FieldKind, Rule, Prompt, &'static str)> = vec![
            (
                FieldKey::Name,
                FieldKind::ChoiceSet,
                Rule::Index(&BRANDS),
                free(format!("Choose Brand:\n\n{brand_list}")),
                "You have entered incorrect brand number. Please try again.",
            ),
            (
                FieldKey::Year,
                FieldKind::Regex,
                Rule::Pattern(&YEAR_RE),
                free("Enter car production year, for example: 2019"),
                "Entered year is incorrect.",
            ),
            (
                FieldKey::KmDriven,
                FieldKind::Regex,
                Rule::Pattern(&SIX_DIGITS_RE),
                free(
                    "Type total number of integer kilometres the car travelled in its life, \
                     for example: 10000",
                ),
                "Entered km driven is incorrect. Use a whole number from 0 to 999999.",
            ),
            (
                FieldKey::Fuel,
                FieldKind::ChoiceSet,
                Rule::Member(&FUELS),
                choice("Choose fuel type from options below:", &FUELS),
                "Unknown fuel type.",
            ),
            (
                FieldKey::SellerType,
                FieldKind::ChoiceSet,
                Rule::Member(&SELLER_TYPES),
                choice("Choose seller type from the options below:", &SELLER_TYPES),
                "Unknown seller type.",
            ),
            (
                FieldKey::Transmission,
                FieldKind::ChoiceSet,
                Rule::Member(&TRANSMISSIONS),
                choice("Choose transmission type from the options below:", &TRANSMISSIONS),
                "Unknown transmission type.",
            ),
            (
                FieldKey::Owner,
                FieldKind::ChoiceSet,
                Rule::Member(&OWNERS),
                choice("Choose what ownership counts from the options below:", &OWNERS),
                "Unknown ownership count.",
            ),
            (
                FieldKey::Mileage,
                FieldKind::Regex,
                Rule::Pattern(&MILEAGE_RE),
                free(
                    "Enter mileage (kilometers covered by car in 1 litre of fuel), \
                     for example: 7.9",
                ),
                "Entered mileage is incorrect.",
            ),
            (
                FieldKey::Engine,
                FieldKind::Regex,
                Rule::Pattern(&SIX_DIGITS_RE),
                free(
                    "Enter engine CC as integer (the size – or cubic capacity – of a car’s \
                     engine is measured in cubic centimetres (cc)), for example: 1598\n\n\
                     (1598cc engine is translated as a 1.6L engine)",
                ),
                "Entered engine CC is incorrect.",
            ),
            (
                FieldKey::MaxPower,
                FieldKind::Regex,
                Rule::Pattern(&MAX_POWER_RE),
                free("Enter horsepower of an engine, for example: 132.2"),
                "Entered engine max power is incorrect.",
            ),
            (
                FieldKey::Seats,
                FieldKind::Regex,
                Rule::Pattern(&SEATS_RE),
                free("Enter seats number, for example: 5"),
                "Entered seats number is incorrect. Use a number from 1 to 20.",
            ),
        ];

        let last = entries.len() - 1;
        let fields = entries
            .into_iter()
            .enumerate()
            .map(|(i, (key, kind, rule, prompt, notice))| FieldSpec {
                key,
                kind,
                rule,
                prompt,
                notice,
                next: if i == last { Next::Terminal } else { Next::Field(i + 1) },
            })
            .collect();

        Self { fields }
    }

    pub fn get(&self, index: usize) -> Option<&FieldSpec> {
        self.fields.get(index)
    }

    pub fn first(&self) -> Option<&FieldSpec> {
        self.fields.first()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    /// Position of a key in the chain.
    pub fn index_of(&self, key: FieldKey) -> Option<usize> {
        self.fields.iter().position(|f| f.key == key)
    }
}

fn free(text: impl Into<String>) -> Prompt {
    Prompt {
        text: text.into(),
        choices: None,
    }
}

fn choice(text: &str, choices: &'static [&'static str]) -> Prompt {
    Prompt {
        text: text.to_string(),
        choices: Some(choices),
    }
}
