//! OpenAPI description of the service.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::contador::AppState;

/// Build the OpenAPI document.
///
/// When `client_id_header` is set, every operation advertises it as a
/// required header parameter.
pub fn document(client_id_header: Option<&str>) -> Value {
    let mut contador = json!({
        "tags": ["Contador"],
        "summary": "Incrementa e retorna o contador de acessos",
        "operationId": "GetContador",
        "responses": {
            "200": {
                "description": "Valor atual do contador",
                "content": {
                    "application/json": {
                        "schema": { "$ref": "#/components/schemas/Contagem" }
                    }
                }
            },
            "429": {
                "description": "Quota de requisicoes excedida"
            }
        }
    });

    if let Some(header) = client_id_header {
        contador["parameters"] = json!([{
            "name": header,
            "in": "header",
            "required": true,
            "schema": { "type": "string" }
        }]);
    }

    json!({
        "openapi": "3.0.1",
        "info": {
            "title": "APIContagem",
            "description": "Exemplo de implementacao de API para contagem de acessos",
            "version": "v1",
            "contact": {
                "name": "Renato Groffe",
                "url": "https://github.com/renatogroffe"
            },
            "license": {
                "name": "MIT",
                "url": "http://opensource.org/licenses/MIT"
            }
        },
        "paths": {
            "/contador": { "get": contador }
        },
        "components": {
            "schemas": {
                "Contagem": {
                    "type": "object",
                    "properties": {
                        "valorAtual": { "type": "integer", "format": "int64" },
                        "producer": { "type": "string" },
                        "kernel": { "type": "string" },
                        "framework": { "type": "string" },
                        "mensagem": { "type": "string" }
                    }
                }
            }
        }
    })
}

/// `GET /swagger/v1/swagger.json`
pub async fn swagger(State(state): State<AppState>) -> Json<Value> {
    Json(state.docs().clone())
}
