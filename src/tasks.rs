//! Workflow tasks: request validation, instruction text for the agent, and
//! parsers that turn the agent's final answer into structured results.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{ExtractionError, ValidationError};

pub const LUCID_START_URL: &str = "https://lucid.co";

static ROI_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)\{[^{}]*"roi_percentage"[^{}]*\}"#).expect("roi json regex")
});
static ROI_PERCENTAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)roi[_\s]*percentage[:\s]*(\d+)").expect("roi regex"));
static PAYBACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)payback[_\s]*(?:period|months)[:\s]*(\d+)").expect("payback regex")
});
static ANNUAL_SAVINGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)annual[_\s]*savings[:\s]*\$?([\d,]+)").expect("savings regex")
});
static LUCID_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S*lucid\.app\S*").expect("lucid url regex"));

/// Login for the diagram workflow.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// `POST /diagram` body, as received.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiagramRequest {
    pub opportunity_id: Option<Value>,
    pub company_name: Option<Value>,
    pub industry: Option<String>,
    pub products: Option<Value>,
}

/// A diagram request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagramTask {
    pub company_name: String,
    pub industry: String,
    pub products: Vec<String>,
}

impl DiagramRequest {
    pub fn validate(self) -> Result<DiagramTask, ValidationError> {
        let missing = missing_fields(&[
            ("opportunity_id", &self.opportunity_id),
            ("company_name", &self.company_name),
            ("products", &self.products),
        ]);
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields(missing));
        }

        let products = match self.products {
            Some(Value::Array(items)) if !items.is_empty() => {
                items.iter().map(display_value).collect()
            }
            _ => {
                return Err(ValidationError::Invalid(
                    "products must be a non-empty list".into(),
                ));
            }
        };

        Ok(DiagramTask {
            company_name: self.company_name.as_ref().map(display_value).unwrap_or_default(),
            industry: self.industry.unwrap_or_default(),
            products,
        })
    }
}

impl DiagramTask {
    pub fn instructions(&self, credentials: Option<&Credentials>) -> Result<String, ValidationError> {
        let Credentials { email, password } = credentials.ok_or(
            ValidationError::MissingCredentials("LUCIDCHART_EMAIL / LUCIDCHART_PASSWORD"),
        )?;
        let company = &self.company_name;
        let products = self.products.join(", ");
        let industry = if self.industry.is_empty() {
            String::new()
        } else {
            format!(" ({} industry)", self.industry)
        };

        Ok(format!(
            r#"Create a Lucidchart architecture diagram for {company}{industry}.

Step-by-step instructions:

1. Navigate to {LUCID_START_URL} and wait for the page to load.

2. Find and click the "Sign In" or "Log In" button. Enter the following credentials:
   - Email: {email}
   - Password: {password}
   Click the login/submit button to sign in.

3. After logging in, create a new blank diagram:
   - Look for a "Create" button or "+ New" button
   - Select "Blank Diagram" or "New Document"
   - Wait for the diagram editor to load

4. For each of the following products, add their official logo/icon to the canvas:
   {products}

   For each product:
   - Use the shape library search (usually in a sidebar or toolbar)
   - Search for the product name
   - Find and select the official logo/icon for that product
   - Drag it onto the canvas
   - Position it in a logical architecture layout (arrange components horizontally or in a flow)

5. Add connector arrows between the components to show data flow and integrations:
   - Use the connector/arrow tool from the toolbar
   - Draw arrows connecting related components

6. Add labels to the connectors or near components to describe integrations:
   - Add labels like "Real-time CDC", "Analytics Feed", "API Integration"
   - Position labels near the relevant connectors or components

7. Set the diagram title to "{company} Architecture".

8. Get the shareable link:
   - Click the "Share" button and make sure the document is shareable
   - The URL should look like: https://lucid.app/documents/view/...

9. In your final response, report the shareable link URL clearly. Format it as: "Lucidchart URL: [the full URL]"

Make sure the diagram is well-organized and professional-looking."#
        ))
    }

    pub fn summary(&self) -> String {
        let count = self.products.len();
        let plural = if count == 1 { "" } else { "s" };
        format!(
            "Created diagram with {count} component{plural} for {}",
            self.company_name
        )
    }
}

/// Prefers a `lucid.app` link in the agent's answer, then the page it ended on.
pub fn extract_lucidchart_url(final_response: &str, final_url: &str) -> String {
    LUCID_URL
        .find(final_response)
        .map(|m| {
            m.as_str()
                .trim_end_matches(['.', ',', ')', ']', '"', '\''])
                .to_string()
        })
        .unwrap_or_else(|| final_url.to_string())
}

/// `POST /roi` body, as received.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoiRequest {
    pub opportunity_id: Option<Value>,
    pub company_name: Option<Value>,
    pub total_initial_investment_cost: Option<Value>,
    pub average_annual_cash_flow: Option<Value>,
    pub annual_profit: Option<Value>,
    pub employee_count: Option<Value>,
    pub roi_sheet_url: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoiTask {
    pub company_name: String,
    pub total_initial_investment_cost: f64,
    pub average_annual_cash_flow: f64,
    pub annual_profit: Option<f64>,
    pub sheet_url: String,
}

impl RoiRequest {
    pub fn validate(self) -> Result<RoiTask, ValidationError> {
        let missing = missing_fields(&[
            ("opportunity_id", &self.opportunity_id),
            ("company_name", &self.company_name),
            ("total_initial_investment_cost", &self.total_initial_investment_cost),
            ("average_annual_cash_flow", &self.average_annual_cash_flow),
            ("roi_sheet_url", &self.roi_sheet_url),
        ]);
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields(missing));
        }

        let investment = self.total_initial_investment_cost.as_ref().and_then(as_number);
        let cash_flow = self.average_annual_cash_flow.as_ref().and_then(as_number);
        let (investment, cash_flow) = match (investment, cash_flow) {
            (Some(investment), Some(cash_flow)) if investment >= 0.0 && cash_flow > 0.0 => {
                (investment, cash_flow)
            }
            _ => {
                return Err(ValidationError::Invalid(
                    "total_initial_investment_cost and average_annual_cash_flow must be valid \
                     numbers (investment >= 0, cash flow > 0)"
                        .into(),
                ));
            }
        };

        let annual_profit = match self.annual_profit.as_ref().filter(|v| !v.is_null()) {
            None => None,
            Some(value) => match as_number(value) {
                Some(profit) if profit >= 0.0 => Some(profit),
                _ => {
                    return Err(ValidationError::Invalid(
                        "Invalid optional field: annual_profit must be >= 0".into(),
                    ));
                }
            },
        };
        if let Some(value) = self.employee_count.as_ref().filter(|v| !v.is_null()) {
            match as_number(value) {
                Some(count) if count >= 0.0 && count.fract() == 0.0 => {}
                _ => {
                    return Err(ValidationError::Invalid(
                        "Invalid optional field: employee_count must be a whole number >= 0"
                            .into(),
                    ));
                }
            }
        }

        Ok(RoiTask {
            company_name: self.company_name.as_ref().map(display_value).unwrap_or_default(),
            total_initial_investment_cost: investment,
            average_annual_cash_flow: cash_flow,
            annual_profit,
            sheet_url: self.roi_sheet_url.as_ref().map(display_value).unwrap_or_default(),
        })
    }
}

impl RoiTask {
    pub fn instructions(&self) -> String {
        let RoiTask {
            company_name,
            total_initial_investment_cost,
            average_annual_cash_flow,
            sheet_url,
            ..
        } = self;
        let annual_profit = self
            .annual_profit
            .map(|profit| profit.to_string())
            .unwrap_or_default();

        format!(
            r#"Populate a Google Sheets ROI calculator and extract the calculated values.

Step-by-step instructions:

1. Navigate to the Google Sheets URL: {sheet_url}
   Wait for the sheet to fully load. The Inputs tab is already open (it's the first tab).

2. Locate and fill in the following cells in the Inputs tab:
   - Find the cell for "Company Name" (or similar label) and type: {company_name}
   - Find the cell for "Total Initial Investment Cost" (or similar label like "Initial Investment", "Investment Cost") and type: {total_initial_investment_cost}
   - Find the cell for "Average Annual Cash Flow/Savings" (or similar label like "Annual Cash Flow", "Annual Savings") and type: {average_annual_cash_flow}
   - Find the cell for "Customer Annual Profit" or "Annual Profit" (or similar label) and type: {annual_profit}

   Make sure to click on each cell before typing, and press Enter or Tab after entering each value.

3. Navigate to the "Calculations" tab (or "Results" or "Output" tab) at the bottom of the sheet.

4. Wait at least 5 seconds for the formulas to recalculate, then scroll through the sheet to make sure all calculations have updated.

5. Read the calculated values from the Calculations tab:
   - The "5-Year ROI" value (usually shown as a percentage like 412%)
   - The "Payback Period" value (usually shown in months like 8)
   - The "Annual Savings" value (usually shown as a dollar amount like $847,000)

6. Extract just the numbers: 412% becomes 412, 8 months becomes 8, $847,000 becomes 847000.

7. In your final response, return the values in this EXACT JSON format (no other text, just the JSON):
{{
  "roi_percentage": <number>,
  "payback_months": <number>,
  "annual_savings": <number>
}}

For example, if ROI is 412%, Payback Period is 8 months, and Annual Savings is $847,000, return:
{{
  "roi_percentage": 412,
  "payback_months": 8,
  "annual_savings": 847000
}}

IMPORTANT: Your final response must contain ONLY valid JSON in this format. Do not include any explanatory text before or after the JSON."#
        )
    }

    pub fn summary(&self, figures: &RoiFigures) -> String {
        format!(
            "ROI model shows {}% five-year return for {}",
            figures.roi_percentage, self.company_name
        )
    }
}

/// Figures read off the ROI calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiFigures {
    pub roi_percentage: i64,
    pub payback_months: i64,
    pub annual_savings: i64,
}

/// Reads the ROI triple from the agent's answer: an embedded JSON object
/// first, then `key: 123` style prose.
pub fn extract_roi_figures(text: &str) -> Result<RoiFigures, ExtractionError> {
    if text.trim().is_empty() {
        return Err(ExtractionError {
            message: "Empty response from model".into(),
            raw: text.to_string(),
        });
    }

    if let Some(found) = ROI_JSON.find(text) {
        match serde_json::from_str::<Map<String, Value>>(found.as_str()) {
            Ok(object) => match figures_from_json(&object) {
                Some(figures) => return Ok(figures),
                None => warn!("ROI JSON is missing or has non-numeric values"),
            },
            Err(err) => warn!("ROI JSON did not parse: {err}"),
        }
    }

    let captured = |pattern: &Regex| {
        pattern
            .captures(text)
            .and_then(|caps| caps[1].replace(',', "").parse::<i64>().ok())
    };
    match (
        captured(&ROI_PERCENTAGE),
        captured(&PAYBACK),
        captured(&ANNUAL_SAVINGS),
    ) {
        (Some(roi_percentage), Some(payback_months), Some(annual_savings)) => Ok(RoiFigures {
            roi_percentage,
            payback_months,
            annual_savings,
        }),
        _ => Err(ExtractionError {
            message: "Could not extract ROI values from response".into(),
            raw: text.to_string(),
        }),
    }
}

fn figures_from_json(object: &Map<String, Value>) -> Option<RoiFigures> {
    let field = |key: &str| object.get(key).and_then(as_number).map(|n| n.trunc() as i64);
    Some(RoiFigures {
        roi_percentage: field("roi_percentage")?,
        payback_months: field("payback_months")?,
        annual_savings: field("annual_savings")?,
    })
}

/// Numbers, or strings holding one.
fn as_number(value: &Value) -> Option<f64> {
    let number: Option<f64> = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

/// Absent, null, empty and zero values count as missing.
fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Bool(b)) => !b,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
    }
}

fn missing_fields(fields: &[(&'static str, &Option<Value>)]) -> Vec<&'static str> {
    fields
        .iter()
        .filter(|(_, value)| is_blank(value.as_ref()))
        .map(|(name, _)| *name)
        .collect()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
