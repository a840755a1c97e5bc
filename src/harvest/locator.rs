//! Multi-strategy element location.
//!
//! The acquisition application's markup drifts between releases, so every element
//! class carries a keyword/id profile and is searched by an ordered list of independent
//! strategies:
//! 1. id or test attribute match
//! 2. text / placeholder / label heuristic
//! 3. input-type heuristic (n-th control of a given type)
//! 4. framework binding attributes (`formcontrolname`, `ng-model`, `v-model`, ...)
//!
//! The first strategy that matches wins, so one broken strategy never blocks
//! automation as long as a later one still finds the element.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::control::{ElementRef, ElementSnapshot, UiSnapshot};
use crate::error::HarvestError;
use crate::model::HarvestMode;

/// UI elements the automation needs to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementClass {
    ModeAll,
    ModeSinceLast,
    ModeDateRange,
    FromDate,
    ToDate,
    OutputSettings,
    OutputPath,
    Save,
    Start,
    Cancel,
    Stop,
    CompletionClose,
}

impl ElementClass {
    pub fn for_mode(mode: HarvestMode) -> Self {
        match mode {
            HarvestMode::All => Self::ModeAll,
            HarvestMode::SinceLast => Self::ModeSinceLast,
            HarvestMode::DateRange => Self::ModeDateRange,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ModeAll => "mode_all",
            Self::ModeSinceLast => "mode_since_last",
            Self::ModeDateRange => "mode_date_range",
            Self::FromDate => "from_date",
            Self::ToDate => "to_date",
            Self::OutputSettings => "output_settings",
            Self::OutputPath => "output_path",
            Self::Save => "save",
            Self::Start => "start",
            Self::Cancel => "cancel",
            Self::Stop => "stop",
            Self::CompletionClose => "completion_close",
        }
    }

    fn profile(&self) -> &'static Profile {
        match self {
            Self::ModeAll => &MODE_ALL,
            Self::ModeSinceLast => &MODE_SINCE_LAST,
            Self::ModeDateRange => &MODE_DATE_RANGE,
            Self::FromDate => &FROM_DATE,
            Self::ToDate => &TO_DATE,
            Self::OutputSettings => &OUTPUT_SETTINGS,
            Self::OutputPath => &OUTPUT_PATH,
            Self::Save => &SAVE,
            Self::Start => &START,
            Self::Cancel => &CANCEL,
            Self::Stop => &STOP,
            Self::CompletionClose => &COMPLETION_CLOSE,
        }
    }
}

impl fmt::Display for ElementClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Profiles
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// Radio buttons, tabs, options and mode buttons
    Choice,
    Button,
    DateField,
    TextField,
}

impl Kind {
    /// Candidates for the text and binding strategies.
    fn accepts(&self, element: &ElementSnapshot) -> bool {
        let input_type = element.input_type.as_deref();
        match self {
            Kind::Choice => {
                matches!(input_type, Some("radio") | Some("checkbox"))
                    || element.is_button()
                    || matches!(element.tag.as_str(), "label" | "a" | "option")
                    || matches!(
                        element.role.as_deref(),
                        Some("tab") | Some("radio") | Some("option") | Some("menuitem")
                    )
            }
            Kind::Button => {
                element.is_button()
                    || element.tag == "a"
                    || element.role.as_deref() == Some("menuitem")
            }
            Kind::DateField => {
                element.tag == "input"
                    && matches!(input_type, Some("date") | Some("datetime-local") | Some("text"))
            }
            Kind::TextField => {
                element.tag == "textarea"
                    || (element.tag == "input" && matches!(input_type, Some("text") | None))
            }
        }
    }

    /// Candidates for the type strategy: controls whose type alone identifies them.
    fn strict(&self, element: &ElementSnapshot) -> bool {
        let input_type = element.input_type.as_deref();
        match self {
            Kind::Choice => element.tag == "input" && input_type == Some("radio"),
            Kind::DateField => {
                element.tag == "input" && matches!(input_type, Some("date") | Some("datetime-local"))
            }
            Kind::TextField => element.tag == "input" && input_type == Some("text"),
            Kind::Button => false,
        }
    }
}

struct Profile {
    /// Normalized ids / test ids
    ids: &'static [&'static str],
    /// Phrases matched on word boundaries against text, placeholder and label
    keywords: &'static [&'static str],
    /// Phrases that disqualify a text match
    excluded: &'static [&'static str],
    kind: Kind,
    /// Position among strictly typed controls; `None` disables the type strategy
    ordinal: Option<usize>,
    /// Normalized tokens matched against framework binding attributes
    bindings: &'static [&'static str],
}

static MODE_ALL: Profile = Profile {
    ids: &["modeall", "alldata", "downloadall", "radioall", "harvestall"],
    keywords: &["all data", "all records", "download all", "everything", "all"],
    excluded: &["since", "range", "select all"],
    kind: Kind::Choice,
    ordinal: Some(0),
    bindings: &["all"],
};

static MODE_SINCE_LAST: Profile = Profile {
    ids: &["modesincelast", "sincelast", "newdata", "downloadnew", "radiosincelast"],
    keywords: &["since last", "new data", "new records", "only new", "incremental"],
    excluded: &["range"],
    kind: Kind::Choice,
    ordinal: Some(1),
    bindings: &["sincelast", "incremental", "new"],
};

static MODE_DATE_RANGE: Profile = Profile {
    ids: &["modedaterange", "daterange", "customrange", "radiodaterange"],
    keywords: &["date range", "custom range", "between dates", "range"],
    excluded: &["since last"],
    kind: Kind::Choice,
    ordinal: Some(2),
    bindings: &["daterange", "range", "custom"],
};

static FROM_DATE: Profile = Profile {
    ids: &["fromdate", "startdate", "datefrom", "rangestart"],
    keywords: &["from", "start date", "begin date"],
    excluded: &["to", "end date", "until"],
    kind: Kind::DateField,
    ordinal: Some(0),
    bindings: &["fromdate", "startdate", "datefrom", "from", "start"],
};

static TO_DATE: Profile = Profile {
    ids: &["todate", "enddate", "dateto", "rangeend"],
    keywords: &["to", "end date", "until"],
    excluded: &["from", "start date"],
    kind: Kind::DateField,
    ordinal: Some(1),
    bindings: &["todate", "enddate", "dateto", "to", "end"],
};

static OUTPUT_SETTINGS: Profile = Profile {
    ids: &["outputsettings", "exportsettings", "outputconfig", "configureoutput", "settings", "btnsettings"],
    keywords: &["output settings", "export settings", "output", "destination", "settings", "configure"],
    excluded: &["save", "cancel"],
    kind: Kind::Button,
    ordinal: None,
    bindings: &["outputsettings", "settings", "output", "config"],
};

static OUTPUT_PATH: Profile = Profile {
    ids: &["outputpath", "exportpath", "outputdir", "outputfolder", "destination", "savepath"],
    keywords: &["output folder", "output path", "destination", "save to", "folder", "directory", "path"],
    excluded: &["date", "search"],
    kind: Kind::TextField,
    ordinal: Some(0),
    bindings: &["outputpath", "exportpath", "destination", "path", "folder", "directory"],
};

static SAVE: Profile = Profile {
    ids: &["save", "savesettings", "btnsave", "apply", "btnapply"],
    keywords: &["save", "apply", "ok", "confirm"],
    excluded: &["cancel", "save as"],
    kind: Kind::Button,
    ordinal: None,
    bindings: &["save", "apply", "submit"],
};

static START: Profile = Profile {
    ids: &["start", "startbutton", "btnstart", "startdownload", "downloadbutton", "startharvest"],
    keywords: &["start", "begin", "download", "harvest", "export", "run"],
    excluded: &["cancel", "stop", "abort", "settings", "all", "since", "range"],
    kind: Kind::Button,
    ordinal: None,
    bindings: &["start", "startdownload", "download", "run"],
};

static CANCEL: Profile = Profile {
    ids: &["cancel", "cancelbutton", "btncancel", "canceldownload"],
    keywords: &["cancel"],
    excluded: &[],
    kind: Kind::Button,
    ordinal: None,
    bindings: &["cancel"],
};

static STOP: Profile = Profile {
    ids: &["stop", "stopbutton", "btnstop", "abort", "abortbutton"],
    keywords: &["stop", "abort", "terminate", "halt"],
    excluded: &[],
    kind: Kind::Button,
    ordinal: None,
    bindings: &["stop", "abort"],
};

static COMPLETION_CLOSE: Profile = Profile {
    ids: &["close", "btnclose", "closebutton", "dismiss", "done", "ok"],
    keywords: &["close", "ok", "done", "dismiss", "finish", "×"],
    excluded: &[],
    kind: Kind::Button,
    ordinal: None,
    bindings: &["close", "dismiss", "done"],
};

// ============================================================================
// Strategies
// ============================================================================

type Strategy = for<'a> fn(&Profile, &[&'a ElementSnapshot]) -> Option<&'a ElementSnapshot>;

const STRATEGIES: [(&str, Strategy); 4] = [
    ("id_attribute", by_id),
    ("text_heuristic", by_text),
    ("type_heuristic", by_type),
    ("framework_binding", by_binding),
];

const TEST_ATTRIBUTES: [&str; 5] = ["data-testid", "data-test", "data-qa", "data-id", "data-action"];

const BINDING_ATTRIBUTES: [&str; 8] = [
    "formcontrolname",
    "ng-model",
    "ng-reflect-name",
    "v-model",
    "x-model",
    "data-bind",
    "name",
    "value",
];

/// Lowercase alphanumerics only: `"Since-Last_Btn"` → `"sincelastbtn"`.
fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Splits binding expressions into lowercase words, including camelCase humps:
/// `"click: stopHarvest"` → `["click", "stop", "harvest"]`.
fn tokens(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in value.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_numeric();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Phrase match on word boundaries, so `"all"` does not match `"install"`.
pub(crate) fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    let boundary = |c: Option<char>| c.map_or(true, |c| !c.is_alphanumeric());
    haystack.match_indices(phrase).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + phrase.len()..].chars().next();
        boundary(before) && boundary(after)
    })
}

fn by_id<'a>(profile: &Profile, candidates: &[&'a ElementSnapshot]) -> Option<&'a ElementSnapshot> {
    candidates.iter().copied().find(|element| {
        let id_match = element
            .id
            .as_deref()
            .map(normalize)
            .is_some_and(|id| profile.ids.contains(&id.as_str()));
        id_match
            || TEST_ATTRIBUTES.iter().any(|attr| {
                element
                    .attributes
                    .get(*attr)
                    .is_some_and(|value| profile.ids.contains(&normalize(value).as_str()))
            })
    })
}

fn by_text<'a>(profile: &Profile, candidates: &[&'a ElementSnapshot]) -> Option<&'a ElementSnapshot> {
    let matching: Vec<&'a ElementSnapshot> = candidates
        .iter()
        .copied()
        .filter(|element| profile.kind.accepts(element))
        .filter(|element| {
            let hay = element.haystack();
            profile.keywords.iter().any(|k| contains_phrase(&hay, k))
                && !profile.excluded.iter().any(|k| contains_phrase(&hay, k))
        })
        .collect();

    // An exact text match beats a partial one.
    matching
        .iter()
        .copied()
        .find(|element| {
            let text = element.text.trim().to_lowercase();
            profile.keywords.iter().any(|k| text == *k)
        })
        .or_else(|| matching.first().copied())
}

fn by_type<'a>(profile: &Profile, candidates: &[&'a ElementSnapshot]) -> Option<&'a ElementSnapshot> {
    let ordinal = profile.ordinal?;
    candidates
        .iter()
        .copied()
        .filter(|element| profile.kind.strict(element))
        .nth(ordinal)
}

fn by_binding<'a>(
    profile: &Profile,
    candidates: &[&'a ElementSnapshot],
) -> Option<&'a ElementSnapshot> {
    candidates
        .iter()
        .copied()
        .filter(|element| profile.kind.accepts(element))
        .find(|element| {
            let bound = BINDING_ATTRIBUTES
                .iter()
                .filter_map(|attr| element.attributes.get(*attr))
                .chain(element.value.iter().filter(|_| element.tag == "input"));
            bound.into_iter().any(|value| {
                let whole = normalize(value);
                let tokens = tokens(value);
                profile
                    .bindings
                    .iter()
                    .any(|b| whole == *b || tokens.iter().any(|t| t == b))
            })
        })
}

// ============================================================================
// Public API
// ============================================================================

/// Finds an element of `class` anywhere on the surface.
///
/// # Errors
///
/// Returns [`HarvestError::ElementNotLocated`] naming the class when every strategy
/// comes up empty.
pub fn locate(snapshot: &UiSnapshot, class: ElementClass) -> Result<&ElementSnapshot, HarvestError> {
    locate_within(snapshot, class, None)
}

/// Like [`locate`], restricted to elements inside `container` when given.
pub fn locate_within<'a>(
    snapshot: &'a UiSnapshot,
    class: ElementClass,
    container: Option<&ElementRef>,
) -> Result<&'a ElementSnapshot, HarvestError> {
    let candidates: Vec<&ElementSnapshot> = snapshot.scoped(container).collect();
    let profile = class.profile();

    for (strategy, find) in STRATEGIES {
        if let Some(element) = find(profile, &candidates) {
            debug!(class = %class, strategy, handle = %element.handle, "Element located");
            return Ok(element);
        }
    }

    Err(HarvestError::ElementNotLocated(class))
}

/// Finds the completion surface by its title text. Other open dialogs are
/// ignored so an unrelated popup is never mistaken for completion.
pub fn locate_completion_surface<'a>(
    snapshot: &'a UiSnapshot,
    title: &str,
) -> Option<&'a ElementSnapshot> {
    let wanted = title.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }

    let by_dialog = snapshot.dialogs().find(|dialog| {
        dialog
            .dialog_title
            .as_deref()
            .is_some_and(|t| t.to_lowercase().contains(&wanted))
    });
    if by_dialog.is_some() {
        return by_dialog;
    }

    // Dialogs without a detectable title: fall back to a heading inside one.
    snapshot
        .visible()
        .filter(|e| matches!(e.tag.as_str(), "h1" | "h2" | "h3" | "h4") || e.has_class("title"))
        .find(|e| e.text.to_lowercase().contains(&wanted))
        .and_then(|heading| match &heading.container {
            Some(container) => snapshot.get(container).or(Some(heading)),
            None => Some(heading),
        })
}
