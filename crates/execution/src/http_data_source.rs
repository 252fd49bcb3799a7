use crate::{DataSource, FetchError, Request, Response};
use async_trait::async_trait;
use tracing::Instrument;

/// A data source for a subgraph that is reached over http.
#[derive(Debug)]
pub struct HttpDataSource {
    service: String,
    url: String,
    http_client: reqwest::Client,
}

impl HttpDataSource {
    /// Construct a new http data source that will POST operations to the supplied URL.
    pub fn new(service: impl Into<String>, url: impl Into<String>) -> Self {
        HttpDataSource {
            service: service.into(),
            url: url.into(),
            http_client: reqwest::Client::new(),
        }
    }

    fn http_error(&self, err: impl ToString) -> FetchError {
        FetchError::SubrequestHttpError {
            service: self.service.to_owned(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn process(&self, request: Request) -> Result<Response, FetchError> {
        let response = self
            .http_client
            .post(self.url.as_str())
            .json(&request)
            .send()
            .instrument(tracing::trace_span!("subfetch", service = %self.service))
            .await
            .map_err(|err| self.http_error(err))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|err| self.http_error(err))?;

        serde_json::from_slice::<Response>(&body).map_err(|err| {
            // A body that can't be decoded is most likely the error page of a failed request.
            if status.is_success() {
                FetchError::SubrequestMalformedResponse {
                    service: self.service.to_owned(),
                    reason: err.to_string(),
                }
            } else {
                self.http_error(status)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::{MockServer, Regex};
    use json_ext::json;

    #[tokio::test]
    async fn test_non_chunked() -> Result<(), Box<dyn std::error::Error>> {
        let response = Response::builder()
            .data(json!({
              "allProducts": [
                {
                  "variation": {
                    "id": "OSS"
                  },
                  "id": "apollo-federation"
                },
                {
                  "variation": {
                    "id": "platform"
                  },
                  "id": "apollo-studio"
                }
              ]
            }))
            .build();

        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_matches(Regex::new(".*allProducts.*").unwrap());
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body_obj(&response);
        });
        let data_source = HttpDataSource::new("products", server.url("/graphql"));
        let result = data_source
            .process(
                Request::builder()
                    .query(r#"{allProducts{variation {id}id}}"#)
                    .build(),
            )
            .await?;

        assert_eq!(result, response);
        mock.assert();
        Ok(())
    }

    #[tokio::test]
    async fn variables_are_sent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/graphql").json_body(json!({
                "query": "query($representations:[_Any!]!){_entities(representations:$representations){...on User{name}}}",
                "variables": { "representations": [{ "__typename": "User", "id": "1" }] }
            }));
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({ "data": { "_entities": [{ "name": "Ada" }] } }));
        });
        let data_source = HttpDataSource::new("accounts", server.url("/graphql"));
        let result = data_source
            .process(
                Request::builder()
                    .query("query($representations:[_Any!]!){_entities(representations:$representations){...on User{name}}}")
                    .variables(
                        json!({ "representations": [{ "__typename": "User", "id": "1" }] })
                            .as_object()
                            .cloned()
                            .unwrap(),
                    )
                    .build(),
            )
            .await
            .unwrap();

        assert_eq!(result.data, json!({ "_entities": [{ "name": "Ada" }] }));
        mock.assert();
    }

    #[tokio::test]
    async fn malformed_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/graphql");
            then.status(200).body("not json");
        });
        let data_source = HttpDataSource::new("products", server.url("/graphql"));
        let err = data_source
            .process(Request::builder().query("{ topProducts { upc } }").build())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::SubrequestMalformedResponse { service, .. } if service == "products"
        ));
    }

    #[tokio::test]
    async fn http_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/graphql");
            then.status(502).body("Bad Gateway");
        });
        let data_source = HttpDataSource::new("products", server.url("/graphql"));
        let err = data_source
            .process(Request::builder().query("{ topProducts { upc } }").build())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::SubrequestHttpError {
                service: "products".to_string(),
                reason: "502 Bad Gateway".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn graphql_errors_are_returned() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/graphql");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({ "data": null, "errors": [{ "message": "forbidden" }] }));
        });
        let data_source = HttpDataSource::new("accounts", server.url("/graphql"));
        let response = data_source
            .process(Request::builder().query("{ me { id } }").build())
            .await
            .unwrap();
        assert_eq!(response.data, json_ext::Value::Null);
        assert_eq!(response.errors[0].message, "forbidden");
    }
}
