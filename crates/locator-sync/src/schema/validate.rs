use serde::{Deserialize, Serialize};

use crate::{
    error::{ValidationError, ValidationErrors},
    types::{Amenities, Category, LocationFields, LocationId, ReviewDraft, ShelterPatch},
};

// ============================================================================
// Validation Context
// ============================================================================

struct ValidationContext {
    errors: Vec<ValidationError>,
}

impl ValidationContext {
    fn new() -> Self {
        Self { errors: vec![] }
    }

    fn add_error(
        &mut self,
        path: &str,
        expected: impl Into<String>,
        received: impl Into<String>,
    ) {
        self.errors.push(ValidationError::new(path, expected, received));
    }

    fn finish<T>(self, value: T) -> Result<T, ValidationErrors> {
        ValidationErrors(self.errors).into_result().map(|()| value)
    }
}

// ============================================================================
// Location form input
// ============================================================================

/// Raw add-location form state. Text fields arrive as typed by the user;
/// [`LocationInput::normalize`] turns them into [`LocationFields`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationInput {
    #[serde(rename = "type")]
    pub category: String,
    pub name: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub address: String,
    pub hours: String,
    pub contact: String,
    pub available_beds: String,
    pub capacity: String,
    pub extra_food: String,
}

impl LocationInput {
    pub fn shelter(name: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            category: Category::Shelter.as_str().to_string(),
            name: name.into(),
            lat: Some(lat),
            lng: Some(lng),
            ..Self::default()
        }
    }

    pub fn restaurant(name: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            category: Category::Restaurant.as_str().to_string(),
            name: name.into(),
            lat: Some(lat),
            lng: Some(lng),
            ..Self::default()
        }
    }

    pub fn beds(mut self, available_beds: impl ToString, capacity: impl ToString) -> Self {
        self.available_beds = available_beds.to_string();
        self.capacity = capacity.to_string();
        self
    }

    pub fn extra_food(mut self, extra_food: impl Into<String>) -> Self {
        self.extra_food = extra_food.into();
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn hours(mut self, hours: impl Into<String>) -> Self {
        self.hours = hours.into();
        self
    }

    pub fn contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = contact.into();
        self
    }

    /// Normalize the form into a draft:
    /// - blank optional text becomes `None`
    /// - blank bed counts become 0
    /// - fields of the other category are discarded
    pub fn normalize(&self) -> Result<LocationFields, ValidationErrors> {
        let mut ctx = ValidationContext::new();

        let category = match Category::parse(&self.category) {
            Some(c) => Some(c),
            None => {
                ctx.add_error("type", "\"shelter\" or \"restaurant\"", format!("{:?}", self.category));
                None
            }
        };

        let name = self.name.trim().to_string();
        let lat = self.lat.unwrap_or(f64::NAN);
        let lng = self.lng.unwrap_or(f64::NAN);

        let amenities = match category {
            Some(Category::Shelter) => {
                let available_beds = parse_count(&mut ctx, "available_beds", &self.available_beds);
                let capacity = parse_count(&mut ctx, "capacity", &self.capacity);
                Amenities::Shelter {
                    available_beds,
                    capacity,
                }
            }
            Some(Category::Restaurant) => Amenities::Restaurant {
                extra_food: blank_to_none(&self.extra_food),
            },
            None => Amenities::empty(Category::Shelter),
        };

        let fields = LocationFields {
            name,
            lat,
            lng,
            address: blank_to_none(&self.address),
            hours: blank_to_none(&self.hours),
            contact: blank_to_none(&self.contact),
            amenities,
        };
        check_fields(&mut ctx, &fields);
        ctx.finish(fields)
    }
}

fn blank_to_none(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_count(ctx: &mut ValidationContext, path: &str, raw: &str) -> u32 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return 0;
    }
    match trimmed.parse::<u32>() {
        Ok(n) => n,
        Err(_) => {
            ctx.add_error(path, "non-negative integer", format!("{raw:?}"));
            0
        }
    }
}

fn check_fields(ctx: &mut ValidationContext, fields: &LocationFields) {
    if fields.name.trim().is_empty() {
        ctx.add_error("name", "non-empty string", format!("{:?}", fields.name));
    }
    if !fields.lat.is_finite() || !(-90.0..=90.0).contains(&fields.lat) {
        ctx.add_error("lat", "latitude in [-90, 90]", fields.lat.to_string());
    }
    if !fields.lng.is_finite() || !(-180.0..=180.0).contains(&fields.lng) {
        ctx.add_error("lng", "longitude in [-180, 180]", fields.lng.to_string());
    }
}

// ============================================================================
// Draft checks
// ============================================================================

/// Check an already-typed location draft. The category invariant is carried
/// by [`Amenities`]; this covers the remaining required fields.
pub fn validate_location(fields: &LocationFields) -> Result<(), ValidationErrors> {
    let mut ctx = ValidationContext::new();
    check_fields(&mut ctx, fields);
    ctx.finish(())
}

/// Trim review text and build the draft. Whitespace-only text is rejected.
pub fn normalize_review(location_id: LocationId, text: &str) -> Result<ReviewDraft, ValidationErrors> {
    let draft = ReviewDraft {
        location_id,
        text: text.trim().to_string(),
    };
    validate_review(&draft)?;
    Ok(draft)
}

pub fn validate_review(draft: &ReviewDraft) -> Result<(), ValidationErrors> {
    let mut ctx = ValidationContext::new();
    if draft.text.trim().is_empty() {
        ctx.add_error("text", "non-empty text", format!("{:?}", draft.text));
    } else if draft.text.trim().len() != draft.text.len() {
        ctx.add_error("text", "trimmed text", format!("{:?}", draft.text));
    }
    ctx.finish(())
}

pub fn validate_patch(patch: &ShelterPatch) -> Result<(), ValidationErrors> {
    let mut ctx = ValidationContext::new();
    if patch.is_empty() {
        ctx.add_error("available_beds", "a bed count or capacity to update", "nothing");
    }
    ctx.finish(())
}

/// Parse a typed bed count, as entered in the inline "# beds" box.
pub fn parse_beds(raw: &str) -> Result<u32, ValidationErrors> {
    let mut ctx = ValidationContext::new();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        ctx.add_error("available_beds", "a number", "\"\"");
        return ctx.finish(0);
    }
    let beds = parse_count(&mut ctx, "available_beds", trimmed);
    ctx.finish(beds)
}
