//! Role instructions and prompt templates.
//!
//! The case workflow runs on Spanish support reports, so every instruction
//! and template is written in Spanish.

use judgeloop_llm::Role;
use judgeloop_shared::Department;

// ---------------------------------------------------------------------------
// Case pipeline roles
// ---------------------------------------------------------------------------

const ANONYMIZER_INSTRUCTIONS: &str = "\
Eres un anonimizador de texto en español. Tu única tarea es anonimizar el texto que recibes \
y devolverlo en el campo `text` de un objeto JSON. Reemplaza toda la información personal o \
sensible usando exactamente estas etiquetas:
- Nombres de personas (\"Juan Pérez\", \"Dr. García\"): [NOMBRE]
- Lugares y direcciones (ciudades, calles, hospitales): [LUGAR]
- Empresas y lugares de trabajo: [EMPRESA]
- Cargos y profesiones concretas: [CARGO]
- Fechas que identifiquen un evento (\"15 de mayo de 1990\", \"el lunes pasado\"): [FECHA]
- Teléfonos: [NÚMERO DE TELÉFONO]
- Emails: [EMAIL]
- DNI, pasaporte, número de cliente o similares: [NÚMERO DE IDENTIFICACIÓN]
- PIN, contraseñas, códigos de acceso o de reserva: [CÓDIGO CONFIDENCIAL]
- Tarjetas, IBAN u otros datos bancarios: [DATO BANCARIO]
No añadas comentarios ni cambies el resto del texto.";

const ANONYMIZER_JUDGE_INSTRUCTIONS: &str = "\
Eres un juez de anonimización. Recibirás un texto original y su versión anonimizada. \
Comprueba que todos los datos sensibles del original se han sustituido por su etiqueta y \
que el resto del contenido se conserva. Responde con un objeto JSON con un único campo \
booleano `approved`.";

pub fn anonymizer_role() -> Role {
    Role::new("anonymizer", ANONYMIZER_INSTRUCTIONS)
}

pub fn anonymizer_judge_role() -> Role {
    Role::new("anonymizer-judge", ANONYMIZER_JUDGE_INSTRUCTIONS)
}

/// Render the department catalogue as `- {id}: {description}` lines.
pub fn render_departments(departments: &[Department]) -> String {
    departments
        .iter()
        .map(|d| format!("- {}: {}", d.id, d.description))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn reviewer_role(departments: &str) -> Role {
    Role::new(
        "reviewer",
        format!(
            "Eres un experto en análisis de casos de soporte. Analiza el informe de un caso y \
devuelve un objeto JSON con:
1. status: \"done\" si el caso está resuelto, \"pending\" si sigue abierto.
2. actions: una frase concisa con las acciones realizadas o pendientes.
3. info: cualquier otra información relevante.
4. department: el identificador del departamento más adecuado de la lista:
{departments}
Devuelve solo el objeto JSON."
        ),
    )
}

pub fn reviewer_judge_role(departments: &str) -> Role {
    Role::new(
        "reviewer-judge",
        format!(
            "Eres un auditor experto en la gestión de casos de soporte. Recibirás un informe y \
el análisis JSON de un revisor. Comprueba:
- status: ¿refleja la situación del caso?
- actions: ¿el resumen es fiel al informe?
- info: ¿la información es relevante?
- department: ¿es el departamento adecuado? Departamentos disponibles:
{departments}
Responde con un objeto JSON con un único campo booleano `approved`: true si todo es \
correcto, false si hay algún error."
        ),
    )
}

pub fn anonymize_prompt(text: &str) -> String {
    format!("Anonimiza el siguiente texto:\n\n---\n{text}\n---")
}

pub fn anonymize_judge_prompt(original: &str, anonymized: &str) -> String {
    format!(
        "Evalúa si la siguiente anonimización es correcta.\n\
Texto original:\n---\n{original}\n---\n\n\
Texto anonimizado:\n---\n{anonymized}\n---"
    )
}

pub fn review_prompt(report: &str) -> String {
    format!("Analiza el siguiente informe del caso:\n\n---\n{report}\n---")
}

pub fn review_judge_prompt(report: &str, analysis_json: &str) -> String {
    format!(
        "Evalúa si la siguiente revisión es correcta.\n\
Informe del caso:\n---\n{report}\n---\n\n\
Análisis del revisor (JSON):\n---\n{analysis_json}\n---"
    )
}

// ---------------------------------------------------------------------------
// Chat roles
// ---------------------------------------------------------------------------

const INTENT_INSTRUCTIONS: &str = r#"Eres un experto sintetizando consultas de usuarios.
Recibirás una conversación previa y una consulta nueva.
1. Genera las palabras clave (keywords) que mejor sintetizan la intención de la consulta.
2. Clasifica la búsqueda como "busqueda general" (cualquier tema que no sean cursos de formación) o "busqueda de cursos" (la consulta trata de cursos de formación).
Devuelve un JSON con el formato {"keywords": "...", "busqueda": "..."}.
Ejemplo: conversación previa "Quiero un curso de inteligencia artificial", consulta "Pero que sea de nivel avanzado" => {"keywords": "curso inteligencia artificial nivel avanzado", "busqueda": "busqueda de cursos"}"#;

const RERANK_INSTRUCTIONS: &str = r#"Eres un experto asesorando cursos de formación.
Recibirás una conversación previa, una consulta nueva y un listado de cursos con id, nombre, descripción y score.
Elige los cursos cuyo contenido mejor se ajuste a la consulta e intención del usuario; ignora el score.
Devuelve un JSON {"ids": [...]} con los ids ordenados de mayor a menor ajuste. Si ningún curso se ajusta bien, o la consulta es demasiado vaga, devuelve {"ids": []}."#;

const GENERAL_INSTRUCTIONS: &str = r#"Eres un chatbot amistoso experto en cursos. Responde a las preguntas del usuario usando solo tu conocimiento general y recuérdale con amabilidad que tu propósito es ayudarle a encontrar cursos de formación.
Devuelve un JSON {"respuesta": "..."}."#;

pub fn intent_role() -> Role {
    Role::new("intent", INTENT_INSTRUCTIONS)
}

pub fn rerank_role() -> Role {
    Role::new("reranker", RERANK_INSTRUCTIONS)
}

pub fn general_role() -> Role {
    Role::new("general", GENERAL_INSTRUCTIONS)
}

/// Conversation context plus the new query, as every chat role sees it.
pub fn chat_prompt(history_json: &str, query: &str) -> String {
    format!(
        "###Conversación previa que debes tener en cuenta para responder: {history_json}\n\
###Consulta actual: {query}"
    )
}

pub fn rerank_prompt(chat_prompt: &str, candidates_json: &str) -> String {
    format!("#Conversación previa y consulta:\n{chat_prompt}\n#Cursos a elegir:\n{candidates_json}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn departments_render_one_per_line() {
        let departments = vec![
            Department {
                id: "SOP".into(),
                description: "Soporte técnico".into(),
            },
            Department {
                id: "FAC".into(),
                description: "Facturación".into(),
            },
        ];
        assert_eq!(
            render_departments(&departments),
            "- SOP: Soporte técnico\n- FAC: Facturación"
        );
    }

    #[test]
    fn reviewer_roles_embed_catalogue() {
        let catalogue = "- SOP: Soporte técnico";
        assert!(reviewer_role(catalogue).instructions.contains(catalogue));
        assert!(reviewer_judge_role(catalogue).instructions.contains(catalogue));
    }

    #[test]
    fn judge_prompt_carries_both_texts() {
        let prompt = anonymize_judge_prompt("Juan llamó", "[NOMBRE] llamó");
        assert!(prompt.contains("Juan llamó"));
        assert!(prompt.contains("[NOMBRE] llamó"));
    }
}
