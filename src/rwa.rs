//! Motor de lógica RWA: extracción de parámetros desde texto libre y cálculo
//! del RWA por el método estándar, ambos delegados al LLM.

use std::collections::{BTreeMap, HashMap};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    llm::{self, FlowError, PromptModel, PromptRequest},
    models::{InputParameter, InputValue},
    prompts,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRwaTextInput {
    pub rwa_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRwaTextOutput {
    /// Summary of the RWA calculation logic, referencing CFR Title 12 sections.
    pub logic_summary: String,
    /// Input parameters required for the calculation, in display order.
    pub required_inputs: Vec<InputParameter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateRwaInput {
    pub rwa_context: String,
    pub provided_inputs: BTreeMap<String, InputValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CalculateRwaOutput {
    /// The final calculated Risk-Weighted Asset value.
    pub calculated_rwa: f64,
    /// The method applied, citing CFR Title 12 provisions (standardized approach).
    pub calculation_method: String,
    /// Step-by-step explanation of the calculation.
    pub calculation_steps: String,
}

pub async fn process_rwa_text(
    model: &dyn PromptModel,
    input: ProcessRwaTextInput,
) -> Result<ProcessRwaTextOutput, FlowError> {
    if input.rwa_text.trim().is_empty() {
        return Err(FlowError::InvalidInput(
            "Pega primero el texto con la lógica de cálculo RWA.".into(),
        ));
    }

    let request = PromptRequest {
        flow: "processRwaText",
        preamble: llm::structured_preamble::<ProcessRwaTextOutput>(&prompts::process_rwa_text_preamble()),
        prompt: prompts::render_process_rwa_text_prompt(&input.rwa_text),
        input: serde_json::json!({ "rwaText": input.rwa_text }),
    };
    let output: ProcessRwaTextOutput = llm::invoke(model, request).await?;

    if output.required_inputs.is_empty() {
        info!("No se identificaron parámetros de entrada para el cálculo");
    }
    Ok(output)
}

pub async fn calculate_rwa(
    model: &dyn PromptModel,
    input: CalculateRwaInput,
) -> Result<CalculateRwaOutput, FlowError> {
    let provided_inputs = coerce_inputs(input.provided_inputs);

    let request = PromptRequest {
        flow: "calculateRwa",
        preamble: llm::structured_preamble::<CalculateRwaOutput>(&prompts::calculate_rwa_preamble()),
        prompt: prompts::render_calculate_rwa_prompt(&input.rwa_context, &provided_inputs),
        input: serde_json::json!({
            "rwaContext": input.rwa_context,
            "providedInputs": provided_inputs,
        }),
    };
    let output: CalculateRwaOutput = llm::invoke(model, request).await?;
    info!("RWA calculado: {}", output.calculated_rwa);
    Ok(output)
}

/// Convierte cadenas numéricas en números y `yes`/`no`/`true`/`false` en
/// booleanos. El resto de valores pasa sin cambios.
pub fn coerce_inputs(inputs: BTreeMap<String, InputValue>) -> BTreeMap<String, InputValue> {
    inputs
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                InputValue::Text(text) => coerce_text(text),
                other => other,
            };
            (key, value)
        })
        .collect()
}

fn coerce_text(text: String) -> InputValue {
    if let Some(number) = parse_number(&text) {
        return InputValue::Number(number);
    }
    match text.to_lowercase().as_str() {
        "yes" | "true" => InputValue::Bool(true),
        "no" | "false" => InputValue::Bool(false),
        _ => InputValue::Text(text),
    }
}

/// Enteros como enteros JSON; el resto como `f64` finito.
fn parse_number(text: &str) -> Option<serde_json::Number> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Some(int.into());
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
}

/// Valida los valores del formulario contra los parámetros requeridos y los
/// convierte a valores tipados. Los parámetros numéricos o de porcentaje deben
/// ser números; los valores sin parámetro asociado se envían como texto.
pub fn collect_form_inputs(
    params: &[InputParameter],
    values: &HashMap<String, String>,
) -> Result<BTreeMap<String, InputValue>, FlowError> {
    for param in params {
        let value = values.get(&param.name).map(|v| v.trim()).unwrap_or_default();
        if value.is_empty() {
            return Err(FlowError::InvalidInput(format!(
                "Please provide a value for \"{}\".",
                param.label
            )));
        }
        if param.input_type.is_numeric() && parse_number(value).is_none() {
            return Err(FlowError::InvalidInput(format!(
                "\"{}\" must be a valid number.",
                param.label
            )));
        }
    }

    let mut inputs = BTreeMap::new();
    for (name, raw) in values {
        let numeric = params
            .iter()
            .any(|p| &p.name == name && p.input_type.is_numeric());
        let value = match parse_number(raw) {
            Some(number) if numeric => InputValue::Number(number),
            _ => InputValue::Text(raw.clone()),
        };
        inputs.insert(name.clone(), value);
    }
    Ok(inputs)
}
